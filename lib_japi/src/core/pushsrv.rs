//! # Push Service Runtime
//!
//! A push service is a named producer of JSON messages with its own task
//! and a dynamic set of subscribers. Clients subscribe and unsubscribe
//! through the built-in request handlers in this module; the producer
//! routine fans every message out to the current subscriber set.
//!
//! ## Core behavior
//!
//! 1. **Fan-out without copies**: a message is serialized once and shared
//!    across the subscriber set as an `Arc<String>`. Each delivery is a
//!    channel send into the subscriber's writer task.
//! 2. **Eviction on failure**: a subscriber whose channel is closed (its
//!    writer task is gone) is dropped from this service's set only. The
//!    client may still be alive for other services; full cleanup is the
//!    job of the disconnect cascade.
//! 3. **Cooperative producer lifecycle**: `start` spawns the user routine
//!    as a task, `stop` flips the `enabled` flag and joins it. Routines
//!    are expected to check [`PushService::is_enabled`] between emissions.
//!
//! The per-service lock guards the subscriber set and is never held while
//! the context lock is taken, and vice versa. Disconnect cleanup walks the
//! services one at a time and only then touches the client table.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::core::clients::ClientSender;
use crate::core::context::JapiContext;
use crate::error::JapiError;
use crate::utils;

struct Subscriber {
    socket: i32,
    sender: ClientSender,
}

/// A registered push service. Obtained from
/// [`JapiContext::register_push_service`] and shared with the producer
/// routine.
pub struct PushService {
    name: String,
    enabled: AtomicBool,
    subscribers: Mutex<Vec<Subscriber>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PushService {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
            task: Mutex::new(None),
        }
    }

    /// The service name clients subscribe to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the producer routine should keep running. Routines must
    /// check this between emissions so `stop` can join promptly.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Number of subscriber records, duplicates included.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("push service lock poisoned")
            .len()
    }

    /// Starts the producer routine on its own task.
    ///
    /// The routine receives this service handle and is expected to loop
    /// while [`is_enabled`](Self::is_enabled) holds, calling
    /// [`send`](Self::send) for each message.
    pub fn start<F, Fut>(self: &Arc<Self>, routine: F) -> Result<(), JapiError>
    where
        F: FnOnce(Arc<PushService>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut task = self.task.lock().expect("push service lock poisoned");
        if task.is_some() {
            return Err(JapiError::InvalidArgument(format!(
                "push service '{}' is already running",
                self.name
            )));
        }
        self.enabled.store(true, Ordering::SeqCst);
        *task = Some(tokio::spawn(routine(Arc::clone(self))));
        Ok(())
    }

    /// Tells the routine to end and waits for its task to finish.
    pub async fn stop(&self) -> Result<(), JapiError> {
        self.enabled.store(false, Ordering::SeqCst);
        let handle = self
            .task
            .lock()
            .expect("push service lock poisoned")
            .take();
        match handle {
            None => Err(JapiError::NotRunning),
            Some(handle) => {
                if let Err(e) = handle.await {
                    log::error!("push service routine '{}' failed: {e}", self.name);
                }
                Ok(())
            }
        }
    }

    /// Sends one message to every subscriber.
    ///
    /// The `{ "japi_pushsrv": <name>, "data": <message> }` envelope is
    /// serialized once; subscribers whose write channel is gone are
    /// unsubscribed from this service on the spot. Returns the number of
    /// successful deliveries, 0 when nobody is subscribed, and an error
    /// when there is nothing to send.
    pub fn send(&self, message: &Value) -> Result<usize, JapiError> {
        if message.is_null() {
            return Err(JapiError::InvalidArgument("nothing to send".to_string()));
        }

        let mut subscribers = self
            .subscribers
            .lock()
            .expect("push service lock poisoned");
        if subscribers.is_empty() {
            return Ok(0);
        }

        let envelope = json!({
            "japi_pushsrv": self.name,
            "data": message,
        });
        let line = Arc::new(utils::to_line(&envelope));

        let mut delivered = 0;
        subscribers.retain(|subscriber| {
            match subscriber.sender.send(Arc::clone(&line)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    log::info!(
                        "pushsrv '{}': client {} is gone, unsubscribing",
                        self.name,
                        subscriber.socket
                    );
                    false
                }
            }
        });
        Ok(delivered)
    }

    /// Stops the producer if it is running and drops every subscription.
    pub async fn destroy(&self) {
        // NotRunning just means there is no routine to join.
        let _ = self.stop().await;
        self.subscribers
            .lock()
            .expect("push service lock poisoned")
            .clear();
    }

    pub(crate) fn add_subscriber(&self, socket: i32, sender: ClientSender) {
        self.subscribers
            .lock()
            .expect("push service lock poisoned")
            .push(Subscriber { socket, sender });
        log::debug!("pushsrv '{}': client {} subscribed", self.name, socket);
    }

    /// Removes the first subscriber record matching `socket`. Returns
    /// whether a record was removed.
    pub(crate) fn remove_first_subscriber(&self, socket: i32) -> bool {
        let mut subscribers = self
            .subscribers
            .lock()
            .expect("push service lock poisoned");
        match subscribers.iter().position(|s| s.socket == socket) {
            Some(pos) => {
                subscribers.remove(pos);
                log::debug!("pushsrv '{}': client {} unsubscribed", self.name, socket);
                true
            }
            None => false,
        }
    }

    /// Removes every subscriber record matching `socket`.
    pub(crate) fn remove_subscriber(&self, socket: i32) {
        self.subscribers
            .lock()
            .expect("push service lock poisoned")
            .retain(|s| s.socket != socket);
    }
}

/// Disconnect cascade: drops every subscription held by `socket`, each
/// service's lock taken only for its own scan.
pub(crate) fn remove_socket_from_all_services(ctx: &JapiContext, socket: i32) {
    log::debug!("removing client {socket} from all push services");
    for service in ctx.push_service_handles() {
        service.remove_subscriber(socket);
    }
}

/// Built-in `japi_pushsrv_subscribe` handler. The dispatcher injects the
/// calling client's socket into `args` before invoking it.
pub(crate) fn subscribe(ctx: &JapiContext, args: &Value, response: &mut Value) {
    let Ok(name) = utils::get_str(args, "service") else {
        response["success"] = json!(false);
        response["message"] = json!("Push service not found.");
        return;
    };
    let socket = args.get("socket").and_then(Value::as_i64).unwrap_or(-1) as i32;

    response["service"] = json!(name);
    match ctx.find_push_service(name) {
        Some(service) => match ctx.client_sender(socket) {
            Some(sender) => {
                service.add_subscriber(socket, sender);
                response["success"] = json!(true);
            }
            None => {
                log::error!("subscribe request from unknown client {socket}");
                response["success"] = json!(false);
                response["message"] = json!("Client not connected.");
            }
        },
        None => {
            response["success"] = json!(false);
            response["message"] = json!("Push service not found.");
        }
    }
}

/// Built-in `japi_pushsrv_unsubscribe` handler.
pub(crate) fn unsubscribe(ctx: &JapiContext, args: &Value, response: &mut Value) {
    let Ok(name) = utils::get_str(args, "service") else {
        response["success"] = json!(false);
        response["message"] = json!("Push service not found.");
        return;
    };
    let socket = args.get("socket").and_then(Value::as_i64).unwrap_or(-1) as i32;

    response["service"] = json!(name);
    match ctx.find_push_service(name) {
        Some(service) => {
            if service.remove_first_subscriber(socket) {
                response["success"] = json!(true);
            } else {
                response["success"] = json!(false);
                response["message"] =
                    json!("Can't unsubscribe a service that wasn't subscribed before.");
            }
        }
        None => {
            response["success"] = json!(false);
            response["message"] = json!("Push service not found.");
        }
    }
}

/// Built-in `japi_pushsrv_list` handler: the registered service names.
pub(crate) fn list(ctx: &JapiContext, _args: &Value, response: &mut Value) {
    response["services"] = json!(ctx.push_service_names());
}
