mod bridge;
mod config;
mod devices;
mod lease;
mod rpc;
mod transport;

use bridge::{Publisher, Worker};
use config::Config;
use gatekeeper_shared::{codec, now_ms, topics, SystemStatus, TelemetryPayload};
use lease::{LeaseManager, LeaseSweeper};
use rpc::{CorrelationRegistry, RpcHandler};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, sleep, Duration};
use transport::{BusMessage, LocalBus, MessageBus};

use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = Config::default();
    info!("Gatekeeper starting as {}", config.client_id);

    let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
    run(config, bus).await
}

async fn run(config: Config, bus: Arc<dyn MessageBus>) -> anyhow::Result<()> {
    // The will covers unexpected death; graceful shutdown says goodbye
    // explicitly below.
    bus.set_will(BusMessage::retained(
        topics::STATUS,
        SystemStatus::Offline.as_str(),
    ))
    .await;

    let (commands, cmd_rx, sink, out_rx) = bridge::channels(
        config.command_queue_capacity,
        config.event_queue_capacity,
    );

    let build = config.build_devices()?;
    let mut registry = build.registry;
    registry.attach_sinks(&sink);
    let catalog = Arc::new(registry.catalog());
    info!("{} devices configured", registry.len());

    // Retained bootstrap: liveness and the device map
    bus.publish(BusMessage::retained(
        topics::STATUS,
        SystemStatus::Online.as_str(),
    ))
    .await?;
    bus.publish(BusMessage::retained(
        topics::REGISTRY,
        codec::encode(&catalog.registry_payload())?,
    ))
    .await?;

    // Hardware domain: one dedicated worker thread
    let _worker = Worker::new(registry, cmd_rx, sink.clone()).spawn()?;

    // Network domain: publisher, sweeps, inbound dispatch
    let correlations = Arc::new(CorrelationRegistry::new());
    tokio::spawn(Publisher::new(out_rx, bus.clone(), correlations.clone()).run());

    let leases = Arc::new(LeaseManager::new(
        config.lease.clone(),
        build.safety,
        commands.clone(),
        sink.clone(),
    ));
    tokio::spawn(
        LeaseSweeper::new(leases.clone(), Duration::from_millis(config.sweep_interval_ms)).run(),
    );

    {
        let correlations = correlations.clone();
        let max_age = config.correlation_max_age_ms;
        let sweep_interval = config.sweep_interval_ms;
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(sweep_interval));
            loop {
                ticker.tick().await;
                let pruned = correlations.prune_stale(now_ms(), max_age);
                if pruned > 0 {
                    debug!(pruned, "stale correlation entries dropped");
                }
            }
        });
    }

    let rpc = Arc::new(RpcHandler::new(
        catalog,
        leases.clone(),
        commands.clone(),
        sink.clone(),
        correlations.clone(),
    ));
    let mut inbound = bus.subscribe(topics::RPC_COMMANDS).await?;
    {
        let rpc = rpc.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                rpc.handle_inbound(&msg.payload).await;
            }
            warn!("command subscription closed");
        });
    }

    // System telemetry loop
    let started = Instant::now();
    {
        let sink = sink.clone();
        let telemetry_interval = config.telemetry_interval_ms;
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(telemetry_interval));
            loop {
                ticker.tick().await;
                sink.telemetry(TelemetryPayload::running(
                    started.elapsed().as_millis() as u64
                ));
            }
        });
    }

    // Button interrupts are wired by the platform pin factory; the
    // trigger handles stay parked here until it claims them.
    let _triggers = build.triggers;

    info!("Gatekeeper is fully operational");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    sink.telemetry(TelemetryPayload::shutting_down(
        started.elapsed().as_millis() as u64,
    ));
    bus.publish(BusMessage::retained(
        topics::STATUS,
        SystemStatus::Offline.as_str(),
    ))
    .await?;
    // Give the publisher a moment to flush before the bus goes away
    sleep(Duration::from_millis(100)).await;
    bus.close().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeeper_shared::{idents, Response, ResponseStatus};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    /// Full pipeline minus the timers: LocalBus, worker thread, publisher,
    /// lease manager with manual sweeps.
    struct Pipeline {
        bus: Arc<LocalBus>,
        rpc: Arc<RpcHandler>,
        leases: Arc<LeaseManager>,
    }

    fn request(device: &str, method: &str, args: Value, id: &str, client: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "device": device,
            "method": method,
            "args": args,
            "correlation_id": id,
            "client_id": client,
            "response_topic": format!("pi/rpc/responses/{client}"),
        }))
        .unwrap()
    }

    async fn recv_response(rx: &mut mpsc::Receiver<transport::BusMessage>) -> Response {
        let msg = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for response")
            .expect("bus closed");
        serde_json::from_slice(&msg.payload).unwrap()
    }

    fn pipeline() -> Pipeline {
        let config = Config::default();
        let bus = Arc::new(LocalBus::new());

        let (commands, cmd_rx, sink, out_rx) =
            bridge::channels(config.command_queue_capacity, config.event_queue_capacity);

        let build = config.build_devices().unwrap();
        let mut registry = build.registry;
        registry.attach_sinks(&sink);
        let catalog = Arc::new(registry.catalog());

        Worker::new(registry, cmd_rx, sink.clone()).spawn().unwrap();

        let correlations = Arc::new(CorrelationRegistry::new());
        tokio::spawn(Publisher::new(out_rx, bus.clone(), correlations.clone()).run());

        let leases = Arc::new(LeaseManager::new(
            config.lease.clone(),
            build.safety,
            commands.clone(),
            sink.clone(),
        ));
        let rpc = Arc::new(RpcHandler::new(
            catalog,
            leases.clone(),
            commands,
            sink,
            correlations,
        ));

        Pipeline { bus, rpc, leases }
    }

    #[tokio::test]
    async fn test_lease_arbitration_scenario() {
        let px = pipeline();
        let mut responses_a = px.bus.subscribe("pi/rpc/responses/a").await.unwrap();
        let mut responses_b = px.bus.subscribe("pi/rpc/responses/b").await.unwrap();
        let mut motor_state = px.bus.subscribe("pi/devices/motor1/state").await.unwrap();

        // Client A takes the motor lease
        px.rpc
            .handle_inbound(&request(
                idents::LEASE_DEVICE,
                "grant",
                json!(["motor1", 30]),
                "a-1",
                "a",
            ))
            .await;
        let granted = recv_response(&mut responses_a).await;
        assert_eq!(granted.status, ResponseStatus::Ok);
        let expires_at = granted.result.unwrap()["expires_at_ms"].as_u64().unwrap();

        // B's write is denied while A holds the lease
        px.rpc
            .handle_inbound(&request("motor1", "forward", json!([]), "b-1", "b"))
            .await;
        let denied = recv_response(&mut responses_b).await;
        assert_eq!(denied.status, ResponseStatus::Denied);

        // A's write executes and the state change is published
        px.rpc
            .handle_inbound(&request("motor1", "forward", json!([]), "a-2", "a"))
            .await;
        let ok = recv_response(&mut responses_a).await;
        assert_eq!(ok.status, ResponseStatus::Ok);
        let state = timeout(Duration::from_secs(2), motor_state.recv())
            .await
            .unwrap()
            .unwrap();
        let payload: Value = serde_json::from_slice(&state.payload).unwrap();
        assert_eq!(payload["value"], 1.0);

        // A stops renewing; the sweep expires the lease and the dead-man's
        // switch stops the motor
        let expired = px.leases.sweep(expires_at + 1).await;
        assert_eq!(expired.len(), 1);
        let state = timeout(Duration::from_secs(2), motor_state.recv())
            .await
            .unwrap()
            .unwrap();
        let payload: Value = serde_json::from_slice(&state.payload).unwrap();
        assert_eq!(payload["value"], 0.0);

        // The motor is free again: B's write now succeeds
        px.rpc
            .handle_inbound(&request("motor1", "backward", json!([0.5]), "b-2", "b"))
            .await;
        let ok = recv_response(&mut responses_b).await;
        assert_eq!(ok.status, ResponseStatus::Ok);
        assert_eq!(px.leases.holder("motor1").await, None);
    }

    #[tokio::test]
    async fn test_two_requests_get_matched_responses() {
        let px = pipeline();
        let mut responses = px.bus.subscribe("pi/rpc/responses/a").await.unwrap();

        px.rpc
            .handle_inbound(&request("led1", "on", json!([]), "c123", "a"))
            .await;
        px.rpc
            .handle_inbound(&request("led1", "is_lit", json!([]), "c456", "a"))
            .await;

        let first = recv_response(&mut responses).await;
        let second = recv_response(&mut responses).await;
        assert_eq!(first.correlation_id, "c123");
        assert_eq!(second.correlation_id, "c456");
        assert_eq!(second.result.unwrap(), json!(true));
    }

    #[tokio::test]
    async fn test_per_device_event_order_survives_interleaving() {
        let px = pipeline();
        let mut responses = px.bus.subscribe("pi/rpc/responses/a").await.unwrap();
        let mut led_state = px.bus.subscribe("pi/devices/led1/state").await.unwrap();

        // led1 toggles interleaved with motor1 traffic
        let sequence = [
            ("led1", "on"),
            ("motor1", "forward"),
            ("led1", "off"),
            ("motor1", "stop"),
            ("led1", "on"),
        ];
        for (i, (device, method)) in sequence.iter().enumerate() {
            px.rpc
                .handle_inbound(&request(device, method, json!([]), &format!("c{i}"), "a"))
                .await;
        }
        for _ in 0..sequence.len() {
            recv_response(&mut responses).await;
        }

        let mut led_values = Vec::new();
        while let Ok(Some(msg)) = timeout(Duration::from_millis(200), led_state.recv()).await {
            let payload: Value = serde_json::from_slice(&msg.payload).unwrap();
            led_values.push(payload["value"].clone());
        }
        assert_eq!(led_values, vec![json!(true), json!(false), json!(true)]);
    }
}
