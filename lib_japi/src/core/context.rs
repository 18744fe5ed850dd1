//! # Server Context
//!
//! One `JapiContext` per embedded server instance. It owns the handler
//! registry, the push service list, the client table and the runtime
//! options, and it is shared (via `Arc`) between the accept loop, the
//! per-client tasks and the push-service producer tasks.
//!
//! ## Locking
//!
//! The client table has its own lock, the push service list has its own
//! lock, and every push service guards its subscriber set separately. No
//! code path holds the client table lock together with a per-service lock:
//! [`JapiContext::remove_client`] runs the subscription cascade first,
//! service by service, and only then takes the table lock.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::connections::line_reader::DEFAULT_MAX_LINE_SIZE;
use crate::connections::listener::TcpKeepaliveConfig;
use crate::core::clients::{Client, ClientSender, ClientTable};
use crate::core::dispatcher;
use crate::core::pushsrv::{self, PushService};
use crate::core::registry::{HandlerRegistry, RequestHandler};
use crate::error::JapiError;

/// Per-instance state of an embedded JSON API server.
pub struct JapiContext {
    handlers: RwLock<HandlerRegistry>,
    push_services: Mutex<Vec<Arc<PushService>>>,
    clients: Mutex<ClientTable>,
    max_clients: AtomicU16,
    include_args: AtomicBool,
    max_line_size: AtomicUsize,
    keepalive: Mutex<Option<TcpKeepaliveConfig>>,
    shutdown: CancellationToken,
    /// Set once the built-ins are registered; from then on the reserved
    /// request name prefix is enforced.
    init_done: AtomicBool,
}

impl JapiContext {
    /// Creates a context and registers the built-in request handlers.
    pub fn new() -> Arc<Self> {
        let ctx = Arc::new(Self {
            handlers: RwLock::new(HandlerRegistry::new()),
            push_services: Mutex::new(Vec::new()),
            clients: Mutex::new(ClientTable::new()),
            max_clients: AtomicU16::new(0),
            include_args: AtomicBool::new(false),
            max_line_size: AtomicUsize::new(DEFAULT_MAX_LINE_SIZE),
            keepalive: Mutex::new(None),
            shutdown: CancellationToken::new(),
            init_done: AtomicBool::new(false),
        });

        ctx.register(dispatcher::DEFAULT_FALLBACK, dispatcher::request_not_found_handler)
            .expect("built-in registration");
        ctx.register(dispatcher::SUBSCRIBE_REQUEST, pushsrv::subscribe)
            .expect("built-in registration");
        ctx.register(dispatcher::UNSUBSCRIBE_REQUEST, pushsrv::unsubscribe)
            .expect("built-in registration");
        ctx.register("japi_pushsrv_list", pushsrv::list)
            .expect("built-in registration");
        ctx.register("japi_cmd_list", dispatcher::cmd_list)
            .expect("built-in registration");
        ctx.init_done.store(true, Ordering::SeqCst);

        ctx
    }

    /// Registers a request handler under `name`.
    ///
    /// Names are unique (case-insensitive) and, once the context is
    /// constructed, must not start with the reserved `japi_` prefix.
    /// Registration is meant to happen before the server starts.
    pub fn register<F>(&self, name: &str, handler: F) -> Result<(), JapiError>
    where
        F: Fn(&JapiContext, &Value, &mut Value) + Send + Sync + 'static,
    {
        let reserved_prefix_locked = self.init_done.load(Ordering::SeqCst);
        self.handlers
            .write()
            .expect("handler registry lock poisoned")
            .register(name, Arc::new(handler) as RequestHandler, reserved_prefix_locked)
    }

    pub(crate) fn lookup_handler(&self, name: &str) -> Option<RequestHandler> {
        self.handlers
            .read()
            .expect("handler registry lock poisoned")
            .lookup(name)
    }

    /// Registered request names, built-ins included, in registration order.
    pub fn request_names(&self) -> Vec<String> {
        self.handlers
            .read()
            .expect("handler registry lock poisoned")
            .names()
    }

    /// Caps the number of concurrently connected clients. 0 means
    /// unlimited.
    pub fn set_max_clients(&self, max_clients: u16) {
        self.max_clients.store(max_clients, Ordering::SeqCst);
    }

    /// Whether request arguments are echoed on the response envelope.
    pub fn set_include_args_in_response(&self, include: bool) {
        self.include_args.store(include, Ordering::SeqCst);
    }

    pub(crate) fn include_args_in_response(&self) -> bool {
        self.include_args.load(Ordering::SeqCst)
    }

    /// Overrides the maximum accepted request line size.
    pub fn set_max_line_size(&self, max_line_size: usize) {
        self.max_line_size.store(max_line_size, Ordering::SeqCst);
    }

    pub(crate) fn max_line_size(&self) -> usize {
        self.max_line_size.load(Ordering::SeqCst)
    }

    /// Configures TCP keepalive for accepted client sockets.
    pub fn set_tcp_keepalive(&self, config: TcpKeepaliveConfig) {
        *self.keepalive.lock().expect("context lock poisoned") = Some(config);
    }

    pub(crate) fn tcp_keepalive(&self) -> Option<TcpKeepaliveConfig> {
        *self.keepalive.lock().expect("context lock poisoned")
    }

    /// Requests a server shutdown. Idempotent; the accept loop and every
    /// client task observe it promptly.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops every push service (joining its producer task) and drops all
    /// remaining state. Call after the server loop has returned.
    pub async fn destroy(&self) {
        let services: Vec<Arc<PushService>> = {
            let mut list = self.push_services.lock().expect("context lock poisoned");
            std::mem::take(&mut *list)
        };
        for service in services {
            service.destroy().await;
        }
        self.remove_all_clients();
    }

    // ---- push service registry ----

    /// Registers a push service under `name` and returns its handle.
    ///
    /// Names must be non-empty and unused. The duplicate check compares
    /// exact names; subscription requests later match case-insensitively.
    pub fn register_push_service(&self, name: &str) -> Result<Arc<PushService>, JapiError> {
        if name.is_empty() {
            return Err(JapiError::InvalidArgument(
                "push service name is empty".to_string(),
            ));
        }
        let mut services = self.push_services.lock().expect("context lock poisoned");
        if services.iter().any(|s| s.name() == name) {
            return Err(JapiError::Duplicate(name.to_string()));
        }
        let service = Arc::new(PushService::new(name));
        services.push(Arc::clone(&service));
        Ok(service)
    }

    /// Registered push service names, in registration order.
    pub fn push_service_names(&self) -> Vec<String> {
        self.push_services
            .lock()
            .expect("context lock poisoned")
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Finds a push service by name, case-insensitively; subscription
    /// requests are matched the same way request names are.
    pub(crate) fn find_push_service(&self, name: &str) -> Option<Arc<PushService>> {
        self.push_services
            .lock()
            .expect("context lock poisoned")
            .iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Snapshot of the service handles, for walking them without holding
    /// the list lock.
    pub(crate) fn push_service_handles(&self) -> Vec<Arc<PushService>> {
        self.push_services
            .lock()
            .expect("context lock poisoned")
            .clone()
    }

    // ---- client table ----

    /// Admits a client if the cap allows it. The check and the insertion
    /// happen under one lock so the table can never exceed the cap.
    pub(crate) fn try_add_client(
        &self,
        socket: i32,
        sender: ClientSender,
        token: CancellationToken,
    ) -> bool {
        let mut clients = self.clients.lock().expect("context lock poisoned");
        let cap = self.max_clients.load(Ordering::SeqCst);
        if cap != 0 && clients.len() >= cap as usize {
            return false;
        }
        log::debug!("adding client {socket}");
        clients.add(Client {
            socket,
            sender,
            token,
        });
        true
    }

    /// Removes a client: cascades the unsubscribe through every push
    /// service first, then unlinks the table record and cancels the
    /// client's tasks. Dropping the record's channel sender lets the
    /// writer task drain and close the socket.
    pub(crate) fn remove_client(&self, socket: i32) -> Result<(), JapiError> {
        pushsrv::remove_socket_from_all_services(self, socket);

        let removed = self
            .clients
            .lock()
            .expect("context lock poisoned")
            .remove(socket);
        match removed {
            Some(client) => {
                log::debug!("removing client {socket}");
                client.token.cancel();
                Ok(())
            }
            None => Err(JapiError::NotFound(format!("client {socket}"))),
        }
    }

    /// Removes every client. Used for the shutdown drain.
    pub(crate) fn remove_all_clients(&self) {
        let sockets = self
            .clients
            .lock()
            .expect("context lock poisoned")
            .sockets();
        for socket in sockets {
            let _ = self.remove_client(socket);
        }
    }

    /// Number of currently connected clients.
    pub fn num_clients(&self) -> usize {
        self.clients.lock().expect("context lock poisoned").len()
    }

    pub(crate) fn client_sender(&self, socket: i32) -> Option<ClientSender> {
        self.clients
            .lock()
            .expect("context lock poisoned")
            .sender_for(socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn add_client(ctx: &JapiContext, socket: i32) -> bool {
        let (tx, _rx) = mpsc::unbounded_channel();
        ctx.try_add_client(socket, tx, CancellationToken::new())
    }

    #[test]
    fn test_builtins_are_registered() {
        let ctx = JapiContext::new();
        let names = ctx.request_names();
        assert_eq!(
            names,
            vec![
                "japi_request_not_found_handler",
                "japi_pushsrv_subscribe",
                "japi_pushsrv_unsubscribe",
                "japi_pushsrv_list",
                "japi_cmd_list",
            ]
        );
    }

    #[test]
    fn test_register_validation() {
        let ctx = JapiContext::new();
        assert!(ctx.register("req_name", |_c, _a, _r| {}).is_ok());
        assert!(matches!(
            ctx.register("req_name", |_c, _a, _r| {}),
            Err(JapiError::Duplicate(_))
        ));
        assert!(matches!(
            ctx.register("", |_c, _a, _r| {}),
            Err(JapiError::InvalidArgument(_))
        ));
        // The built-in prefix is reserved once the context exists...
        assert!(matches!(
            ctx.register("japi_custom", |_c, _a, _r| {}),
            Err(JapiError::ReservedName(_))
        ));
        // ...but the user fallback name is fair game.
        assert!(ctx.register("request_not_found_handler", |_c, _a, _r| {}).is_ok());
    }

    #[test]
    fn test_client_cap_is_never_exceeded() {
        let ctx = JapiContext::new();
        ctx.set_max_clients(2);
        assert!(add_client(&ctx, 4));
        assert!(add_client(&ctx, 5));
        assert!(!add_client(&ctx, 6));
        assert_eq!(ctx.num_clients(), 2);

        // Unlimited again once the cap is lifted.
        ctx.set_max_clients(0);
        assert!(add_client(&ctx, 6));
        assert_eq!(ctx.num_clients(), 3);
    }

    #[test]
    fn test_remove_clients() {
        let ctx = JapiContext::new();
        for socket in [4, 5, 6, 7] {
            assert!(add_client(&ctx, socket));
        }
        assert!(ctx.remove_client(4).is_ok());
        assert!(ctx.remove_client(5).is_ok());
        assert_eq!(ctx.num_clients(), 2);
        assert!(matches!(
            ctx.remove_client(12),
            Err(JapiError::NotFound(_))
        ));

        ctx.remove_all_clients();
        assert_eq!(ctx.num_clients(), 0);
    }

    #[tokio::test]
    async fn test_destroy_tears_down_push_services() {
        let ctx = JapiContext::new();
        let service = ctx.register_push_service("push_counter").unwrap();
        service
            .start(|svc| async move {
                while svc.is_enabled() {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                }
            })
            .unwrap();

        ctx.shutdown();
        ctx.shutdown(); // second request is a no-op
        ctx.destroy().await;

        assert!(!service.is_enabled());
        assert!(ctx.push_service_names().is_empty());
        assert_eq!(ctx.num_clients(), 0);
    }
}
