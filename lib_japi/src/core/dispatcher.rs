//! # Request Dispatcher
//!
//! Turns one received line into at most one response line.
//!
//! ## Processing steps
//!
//! 1. Parse the line as JSON. A parse failure is logged and produces no
//!    response; the connection stays open and the read loop continues.
//! 2. A message without a `japi_request` string produces no response
//!    either. Clients relying on a reply for such input are left to time
//!    out; this is deliberate and load-bearing.
//! 3. Build the `{ "japi_response": <name> }` envelope, echoing
//!    `japi_request_no` when the request carried one and the request
//!    arguments when the context is configured to do so.
//! 4. For the two subscription built-ins, inject the calling client's
//!    socket into the arguments so the handlers can key subscriber sets by
//!    socket identity.
//! 5. Select the handler: exact name, then a user-registered
//!    `request_not_found_handler`, then the built-in fallback.
//! 6. Invoke it against a fresh data object, attach that object under
//!    `data` and serialize the envelope as a single line.
//!
//! A valid handler call always produces a response line.

use serde_json::{json, Value};

use crate::core::context::JapiContext;
use crate::utils;

/// Name of the built-in fallback for unknown requests.
pub(crate) const DEFAULT_FALLBACK: &str = "japi_request_not_found_handler";

/// Name a user may register to take over unknown-request handling.
pub(crate) const USER_FALLBACK: &str = "request_not_found_handler";

pub(crate) const SUBSCRIBE_REQUEST: &str = "japi_pushsrv_subscribe";
pub(crate) const UNSUBSCRIBE_REQUEST: &str = "japi_pushsrv_unsubscribe";

impl JapiContext {
    /// Processes one request line and returns the response line, if the
    /// input warrants one.
    ///
    /// `socket` is the identity of the client the line came from; it is
    /// what subscription bookkeeping is keyed by.
    pub fn process_line(&self, line: &str, socket: i32) -> Option<String> {
        let request: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                log::error!("failed to parse request ({e}), received message: {line}");
                return None;
            }
        };
        let Some(request_name) = request.get("japi_request").and_then(Value::as_str) else {
            log::error!("request without a 'japi_request' keyword: {line}");
            return None;
        };

        let mut envelope = json!({ "japi_response": request_name });
        if let Some(request_no) = request.get("japi_request_no") {
            envelope["japi_request_no"] = request_no.clone();
        }

        // Arguments are optional; an empty object stands in for absent
        // ones. Only arguments the client actually sent are echoed.
        let given_args = request.get("args").cloned();
        if let Some(ref args) = given_args {
            if self.include_args_in_response() {
                envelope["args"] = args.clone();
            }
        }
        let mut args = given_args.unwrap_or_else(|| json!({}));

        if request_name.eq_ignore_ascii_case(SUBSCRIBE_REQUEST)
            || request_name.eq_ignore_ascii_case(UNSUBSCRIBE_REQUEST)
        {
            if let Some(map) = args.as_object_mut() {
                map.insert("socket".to_string(), json!(socket));
            }
        }

        let handler = self
            .lookup_handler(request_name)
            .or_else(|| {
                let fallback = self.lookup_handler(USER_FALLBACK);
                if fallback.is_some() {
                    log::warn!(
                        "no request handler found for '{request_name}', \
                         falling back to the user registered fallback handler"
                    );
                }
                fallback
            })
            .or_else(|| {
                log::error!(
                    "no request handler found for '{request_name}', \
                     falling back to the default fallback handler"
                );
                self.lookup_handler(DEFAULT_FALLBACK)
            })
            .expect("the default fallback handler is registered at context creation");

        let mut data = json!({});
        handler(self, &args, &mut data);
        envelope["data"] = data;

        Some(utils::to_line(&envelope))
    }
}

/// Built-in fallback for requests nobody handles.
pub(crate) fn request_not_found_handler(_ctx: &JapiContext, _args: &Value, response: &mut Value) {
    response["error"] = json!("no request handler found");
}

/// Built-in `japi_cmd_list` handler: the registered request names.
pub(crate) fn cmd_list(ctx: &JapiContext, _args: &Value, response: &mut Value) {
    response["commands"] = json!(ctx.request_names());
}
