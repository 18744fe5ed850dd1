//! # JSON API Demo Server
//!
//! This binary demonstrates embedding `lib_japi`: it models a temperature
//! sensor, answers `get_temperature` requests and runs two push services
//! that subscribed clients receive without asking.
//!
//! ## Functionality:
//! - **`get_temperature` request**: Returns the sensor value, converted to
//!   kelvin when the request arguments ask for it.
//! - **Custom fallback**: Registers its own `request_not_found_handler`,
//!   which takes precedence over the library's built-in fallback.
//! - **`push_counter` service**: Pushes an incrementing counter once per
//!   second.
//! - **`push_temperature` service**: Pushes a sinusoidal sweep around the
//!   sensor value once per second.
//!
//! Try it with netcat:
//!
//! ```text
//! $ echo '{"japi_request":"get_temperature","args":{"unit":"kelvin"}}' | nc localhost 1234
//! $ echo '{"japi_request":"japi_pushsrv_subscribe","args":{"service":"push_counter"}}' | nc -q 5 localhost 1234
//! ```

use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;

use lib_japi::{start_server, JapiContext, PushService};

/// Command line arguments.
#[derive(Parser)]
#[command(about = "JSON API demo server")]
struct Args {
    /// Port to listen on.
    port: u16,

    /// Maximum number of concurrently connected clients, 0 for unlimited.
    #[arg(long, default_value_t = 3)]
    max_clients: u16,
}

/// The resource shared with handlers and push routines. A real embedding
/// would hold live sensor state here.
struct SensorResources {
    temperature: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let sensor = Arc::new(SensorResources { temperature: 27.0 });

    let ctx = JapiContext::new();
    ctx.set_include_args_in_response(true);
    ctx.set_max_clients(args.max_clients);

    {
        let sensor = Arc::clone(&sensor);
        ctx.register("get_temperature", move |_ctx, request_args, response| {
            let kelvin = matches!(
                lib_japi::utils::get_str(request_args, "unit"),
                Ok("kelvin")
            );
            let temperature = if kelvin {
                sensor.temperature + 273.0
            } else {
                sensor.temperature
            };
            response["temperature"] = json!(temperature);
            response["unit"] = json!(if kelvin { "kelvin" } else { "celsius" });
        })?;
    }

    ctx.register("request_not_found_handler", |_ctx, _args, response| {
        response["japi_response_msg"] = json!("ERROR: No request handler found!");
    })?;

    let counter_service = ctx.register_push_service("push_counter")?;
    counter_service.start(push_counter)?;

    let temperature_service = ctx.register_push_service("push_temperature")?;
    {
        let sensor = Arc::clone(&sensor);
        temperature_service.start(move |service| push_temperature(service, sensor))?;
    }

    // Ctrl-C drains the server instead of killing it mid-write.
    {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("shutdown signal received, draining clients");
                ctx.shutdown();
            }
        });
    }

    start_server(Arc::clone(&ctx), args.port).await?;
    ctx.destroy().await;

    Ok(())
}

/// Pushes an incrementing counter to all subscribers, once per second.
async fn push_counter(service: Arc<PushService>) {
    let mut counter: u64 = 0;
    while service.is_enabled() {
        if let Err(e) = service.send(&json!({ "counter": counter })) {
            log::error!("push_counter: {e}");
        }
        counter += 1;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Pushes a simulated sinusoidal temperature reading, once per second.
async fn push_temperature(service: Arc<PushService>, sensor: Arc<SensorResources>) {
    let mut phase: f64 = 0.0;
    while service.is_enabled() {
        let value = sensor.temperature + 10.0 * phase.sin();
        if let Err(e) = service.send(&json!({ "temperature": value })) {
            log::error!("push_temperature: {e}");
        }
        phase += 0.1;
        if phase > PI {
            phase = 0.0;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
