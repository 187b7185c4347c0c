//! Registry walkthrough against the mock driver.
//!
//! Run with `cargo run --example registry_usage`. Set `RUST_LOG=debug` to see
//! the registry's own logging.

use serial_port_hub::config::LoggingConfig;
use serial_port_hub::port::{HexDump, MockLineDriver, PortDescriptor, ReadEvent};
use serial_port_hub::registry::{OpenOutcome, PortRegistry, RegistrySettings, RetryPolicy};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    serial_port_hub::logging::init(&LoggingConfig::default());

    let driver = MockLineDriver::new();
    // The modem is "unplugged" for the first two attempts.
    driver.fail_next_opens("MODEM", 2);

    let registry = PortRegistry::new(
        Arc::new(driver.clone()),
        RegistrySettings {
            retry: RetryPolicy {
                delay: Duration::from_millis(200),
                max_attempts: 0,
            },
            ..Default::default()
        },
    );
    registry.on_start()?;

    for descriptor in [
        PortDescriptor::with_baud("GPS", 4800),
        PortDescriptor::with_baud("MODEM", 115200),
    ] {
        match registry.open(descriptor) {
            OpenOutcome::RetryScheduled { attempt, delay } => {
                println!("open failed (attempt {attempt}), retrying in {delay:?}")
            }
            outcome => println!("open: {outcome:?}"),
        }
    }

    let gps = registry.get("GPS").ok_or("GPS should be open")?;
    gps.add_listener(|event: &ReadEvent| {
        println!("{} <- {}", event.port(), String::from_utf8_lossy(event.data()));
    });
    driver.enqueue_read("GPS", b"$GPRMC,081836,A,3751.65,S,14507.36,E*62\r\n");

    while !registry.contains("MODEM") {
        thread::sleep(Duration::from_millis(50));
    }
    let modem = registry.get("MODEM").ok_or("MODEM should be open")?;
    let second = registry.get("MODEM").ok_or("MODEM should be open")?;
    modem.add_listener(|event: &ReadEvent| {
        println!("{} <- {}", event.port(), HexDump(event.data()));
    });
    modem.write(b"AT\r\n")?;
    driver.enqueue_read("MODEM", b"OK\r\n");
    thread::sleep(Duration::from_millis(100));

    println!("modem holders: {:?}", registry.holders("MODEM"));
    modem.close();
    println!(
        "after one close, modem open: {} (holders {:?})",
        registry.contains("MODEM"),
        registry.holders("MODEM")
    );
    second.close();
    println!("after last close, modem open: {}", registry.contains("MODEM"));
    println!("modem saw: {}", HexDump(&driver.written("MODEM")));

    drop(gps);
    registry.shutdown();
    Ok(())
}
