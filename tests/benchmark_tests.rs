//! Performance guards for the hot paths of the protocol engine

use assert_approx_eq::assert_approx_eq;
use fsd_shared::{build_packet, is_valid_callsign, parse_line, split_fields, Position, VisPoints};
use std::time::Instant;

const PILOT_POSITION: &str = "@N:CES2352:7000:1:31.20:121.35:87:0:4290770974:278\r\n";
const FLIGHT_PLAN: &str =
    "$FPCES2352:*A:I:B738:450:ZSSS:1200:0:FL350:ZBAA:2:30:3:45:ZSPD:/V/:PIKAS G330 PIMOL\r\n";

fn report(name: &str, iterations: u32, duration: std::time::Duration) {
    println!(
        "{}: {} iterations in {:?} ({:.2} ns/iter)",
        name,
        iterations,
        duration,
        duration.as_nanos() as f64 / f64::from(iterations)
    );
}

/// Benchmarks parsing of the most frequent packet
#[test]
fn benchmark_position_parsing() {
    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let command = parse_line(PILOT_POSITION);
        assert!(command.is_ok());
    }

    let duration = start.elapsed();
    report("Position parsing", iterations, duration);
    assert!(duration.as_millis() < 3000);
}

/// Benchmarks splitting and rebuilding a flight plan line
#[test]
fn benchmark_flight_plan_codec() {
    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let fields = split_fields(&FLIGHT_PLAN[3..FLIGHT_PLAN.len() - 2], Some(17));
        let line = build_packet("$FP", &fields);
        assert_eq!(line.len(), FLIGHT_PLAN.len());
    }

    let duration = start.elapsed();
    report("Flight plan codec", iterations, duration);
    assert!(duration.as_millis() < 3000);
}

/// Benchmarks the great-circle distance used by every in-range broadcast
#[test]
fn benchmark_distance_filter() {
    let shanghai = Position::new(31.1979, 121.3363);
    let beijing = Position::new(40.0801, 116.5846);
    assert_approx_eq!(shanghai.distance_nm(&beijing), 581.0, 5.0);

    let mut controller = VisPoints::default();
    controller.set_primary(shanghai);
    controller.set_extended(1, Position::new(30.2295, 120.4344));
    controller.set_extended(2, Position::new(32.0, 122.0));
    let mut pilot = VisPoints::default();
    pilot.set_primary(beijing);

    let iterations = 100_000;
    let start = Instant::now();

    let mut closest = f64::MAX;
    for _ in 0..iterations {
        if let Some(distance) = controller.min_distance_nm(&pilot) {
            closest = closest.min(distance);
        }
    }

    let duration = start.elapsed();
    report("Visibility distance", iterations, duration);
    assert!(closest < 581.0);
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks callsign validation done on every login
#[test]
fn benchmark_callsign_validation() {
    let callsigns = ["ZSHA_CTR", "CES2352", "B-1234", "TOOLONGCALLSIGN", "A&B"];
    let iterations = 20_000;
    let start = Instant::now();

    let mut valid = 0;
    for _ in 0..iterations {
        for callsign in callsigns {
            if is_valid_callsign(callsign) {
                valid += 1;
            }
        }
    }

    let duration = start.elapsed();
    report("Callsign validation", iterations * callsigns.len() as u32, duration);
    assert_eq!(valid, iterations * 3);
    assert!(duration.as_millis() < 1000);
}
