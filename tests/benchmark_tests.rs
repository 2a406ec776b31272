//! Performance benchmarks for the hot paths of the session server

use serde_json::json;
use server::config::ServerConfig;
use server::network::ServerContext;
use server::session::PlayerInfo;
use server::ticker::tick_all;
use shared::{decode, encode, phase_for, Envelope, MessageKind, Phase};
use std::time::{Duration, Instant};

fn sample_snapshot() -> Envelope {
    Envelope::new(
        MessageKind::StateUpdate,
        shared::SERVER_ID,
        Some("0042".to_string()),
        json!({
            "remainingSetupTime": 12.5,
            "phase": "PENALTY_COOLDOWN",
            "multipliers": {"cooldown": 1.05, "speed": 1.0},
            "scores": {"P1": 12, "P2": 30},
            "timestamp": 1_700_000_000_000u64
        }),
    )
}

/// Benchmarks frame encoding
#[test]
fn benchmark_frame_encoding() {
    let envelope = sample_snapshot();

    let iterations = 50_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = encode(&envelope).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Frame encoding: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks frame decoding
#[test]
fn benchmark_frame_decoding() {
    let frame = encode(&sample_snapshot()).unwrap();

    let iterations = 50_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded.kind, MessageKind::StateUpdate);
    }

    let duration = start.elapsed();
    println!(
        "Frame decoding: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks phase lookup across the whole setup window
#[test]
fn benchmark_phase_lookup() {
    let iterations = 1_000_000u64;
    let start = Instant::now();
    let mut running = 0;

    for i in 0..iterations {
        let elapsed = Duration::from_millis(i % 70_000);
        if phase_for(elapsed) == Phase::Running {
            running += 1;
        }
    }

    let duration = start.elapsed();
    println!(
        "Phase lookup: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(running > 0);
    // Should complete in under 500ms for 1M lookups
    assert!(duration.as_millis() < 500);
}

/// Benchmarks one scheduler pass over a full directory
#[tokio::test]
async fn benchmark_tick_pass() {
    let ctx = ServerContext::from_config(ServerConfig::default()).unwrap();
    let now = Instant::now();

    let sessions = 500;
    for i in 0..sessions {
        let creator = format!("A{}", i);
        let joiner = format!("B{}", i);
        let code = format!("{:04}", i);
        ctx.directory
            .create(&code, PlayerInfo::new(&creator, None), now)
            .unwrap();
        ctx.directory
            .join(&code, PlayerInfo::new(&joiner, None), now)
            .await
            .unwrap();
    }

    let ticks = 100;
    let start = Instant::now();

    for tick in 1..=ticks {
        let at = now + Duration::from_millis(50 * tick);
        assert_eq!(tick_all(&ctx, at).await, sessions);
    }

    let duration = start.elapsed();
    println!(
        "Tick pass: {} ticks over {} sessions in {:?} ({:.2} μs/tick)",
        ticks,
        sessions,
        duration,
        duration.as_micros() as f64 / ticks as f64
    );

    // A pass must fit comfortably inside the 50ms tick budget
    assert!(duration / (ticks as u32) < Duration::from_millis(50));
}

/// Benchmarks session creation with generated codes
#[test]
fn benchmark_session_creation() {
    let ctx = ServerContext::from_config(ServerConfig::default()).unwrap();
    let now = Instant::now();

    let iterations = 2_000;
    let start = Instant::now();

    for i in 0..iterations {
        let player = format!("P{}", i);
        let _ = ctx
            .directory
            .create_with_generated_id(PlayerInfo::new(&player, None), now)
            .unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Session creation: {} sessions in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(ctx.directory.len(), iterations);
    assert!(duration.as_millis() < 1000);
}
