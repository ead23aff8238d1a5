mod common;

use common::{
    driver_config, expected_values, registry, start_device, unused_addr, SLAVE_ID,
};
use pointgate_driver_modbus::{Framing, ModbusDriver, RegisterArea, SimulatedFault};
use pointgate_sdk::{
    DriverError, HealthStatus, PointDriver, PointValue, RetryPolicy, SouthwardConnectionState,
};
use std::{sync::Arc, time::Duration};

#[tokio::test]
async fn silent_slave_times_out_then_recovers() -> anyhow::Result<()> {
    let device = start_device(Framing::Tcp, registry()).await;
    device
        .driver
        .set_point("BigUShort", PointValue::UInt16(77))
        .await?;

    device.simulator.set_fault(Some(SimulatedFault::Silent));
    let err = device.driver.get_point("BigUShort").await.unwrap_err();
    match &err {
        DriverError::Timeout { context, timeout } => {
            assert_eq!(*timeout, Duration::from_millis(300));
            assert!(context.contains("BigUShort"), "{context}");
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    // a scrape under the same fault reports the timeout on every point of each batch
    let scrape = device.driver.scrape_all().await?;
    assert_eq!(scrape.len(), 14);
    assert!(scrape
        .values()
        .all(|r| matches!(r, Err(DriverError::Timeout { .. }))));

    device.simulator.set_fault(None);
    assert_eq!(
        device.driver.get_point("BigUShort").await?,
        PointValue::UInt16(77)
    );
    assert_eq!(
        *device.driver.subscribe_connection_state().borrow(),
        SouthwardConnectionState::Connected
    );
    Ok(())
}

#[tokio::test]
async fn slow_slave_within_deadline_is_fine() -> anyhow::Result<()> {
    let device = start_device(Framing::Tcp, registry()).await;
    device
        .simulator
        .set_fault(Some(SimulatedFault::Delay(Duration::from_millis(50))));
    assert_eq!(
        device.driver.get_point("BigInt").await?,
        PointValue::Int32(0)
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_get_their_own_responses() -> anyhow::Result<()> {
    let device = start_device(Framing::Tcp, registry()).await;
    device
        .simulator
        .set_fault(Some(SimulatedFault::Delay(Duration::from_millis(20))));
    let driver = Arc::new(device.driver);

    let calls = expected_values().into_iter().map(|(name, value)| {
        let driver = Arc::clone(&driver);
        async move {
            let committed = driver.set_point(name, value).await;
            let read = driver.get_point(name).await;
            (name, value, committed, read)
        }
    });
    for (name, value, committed, read) in futures::future::join_all(calls).await {
        assert_eq!(committed, Ok(value), "set {name}");
        assert_eq!(read, Ok(value), "get {name}");
    }

    let scrape = driver.scrape_all().await?;
    for (name, value) in expected_values() {
        assert_eq!(scrape[name], Ok(value), "scrape {name}");
    }
    Ok(())
}

#[tokio::test]
async fn late_response_is_not_mistaken_for_the_next_one() -> anyhow::Result<()> {
    let device = start_device(Framing::Tcp, registry()).await;
    device
        .driver
        .set_point("BigShort", PointValue::Int16(-5))
        .await?;

    device
        .simulator
        .set_fault(Some(SimulatedFault::Delay(Duration::from_millis(500))));
    assert!(matches!(
        device.driver.get_point("BigShort").await,
        Err(DriverError::Timeout { .. })
    ));

    device.simulator.set_fault(None);
    assert_eq!(
        device.driver.get_point("BigUShort").await?,
        PointValue::UInt16(0)
    );
    assert_eq!(
        device.driver.get_point("BigShort").await?,
        PointValue::Int16(-5)
    );
    Ok(())
}

#[tokio::test]
async fn exception_response_maps_to_device_error() -> anyhow::Result<()> {
    let device = start_device(Framing::Tcp, registry()).await;
    device
        .simulator
        .remove_registers(SLAVE_ID, RegisterArea::Holding, 0, 1);

    let err = device.driver.get_point("BigUShort").await.unwrap_err();
    assert_eq!(err.kind(), "device");
    assert!(matches!(
        err,
        DriverError::Device {
            function: 0x03,
            code: 0x02,
            ..
        }
    ));

    let err = device
        .driver
        .set_point("BigUShort", PointValue::UInt16(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DriverError::Device {
            function: 0x06,
            code: 0x02,
            ..
        }
    ));

    // an exception leaves the connection usable
    assert_eq!(
        device.driver.get_point("BigShort").await?,
        PointValue::Int16(0)
    );
    Ok(())
}

#[tokio::test]
async fn malformed_frame_maps_to_protocol_error() -> anyhow::Result<()> {
    for framing in [Framing::Tcp, Framing::RtuOverTcp] {
        let device = start_device(framing, registry()).await;
        device
            .simulator
            .set_fault(Some(SimulatedFault::MalformedFrame));

        let err = device.driver.get_point("BigUInt").await.unwrap_err();
        assert!(
            matches!(err, DriverError::Protocol { .. }),
            "{framing:?}: {err:?}"
        );

        device.simulator.set_fault(None);
        assert_eq!(
            device.driver.get_point("BigUInt").await?,
            PointValue::UInt32(0),
            "{framing:?}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn unreachable_device_is_a_connection_error() -> anyhow::Result<()> {
    common::init_tracing();
    let mut config = driver_config(unused_addr(), Framing::Tcp);
    config.connection_policy.backoff = RetryPolicy::no_retry();
    let tables = pointgate_driver_modbus::ModbusDriverFactory::build_tables(&config, &registry())?;
    let driver = ModbusDriver::new(&config, tables)?;
    let states = driver.subscribe_connection_state();

    let err = driver.get_point("BigUShort").await.unwrap_err();
    assert!(err.is_connection_level(), "{err:?}");
    assert!(matches!(
        *states.borrow(),
        SouthwardConnectionState::Failed(_)
    ));

    // a lost connection fails the whole scrape instead of every point
    assert!(matches!(
        driver.scrape_all().await,
        Err(DriverError::Connection { .. })
    ));
    assert!(matches!(
        driver.start().await,
        Err(DriverError::Connection { .. })
    ));
    assert_eq!(
        driver.health_check().await?.status,
        HealthStatus::Unhealthy
    );
    Ok(())
}

#[tokio::test]
async fn simulator_restart_is_survived() -> anyhow::Result<()> {
    let mut device = start_device(Framing::Tcp, registry()).await;
    device
        .driver
        .set_point("BigLong", PointValue::Int64(-1))
        .await?;
    let addr = device.simulator.local_addr().expect("running");

    device.simulator.stop().await;
    let err = device.driver.get_point("BigLong").await.unwrap_err();
    assert!(
        matches!(
            err,
            DriverError::Connection { .. } | DriverError::Timeout { .. }
        ),
        "{err:?}"
    );

    let mut replacement = pointgate_driver_modbus::ModbusSimulator::new(addr);
    replacement.start().await?;
    replacement.define_slave(SLAVE_ID, device.table(SLAVE_ID))?;
    assert_eq!(
        device.driver.get_point("BigLong").await?,
        PointValue::Int64(0)
    );
    replacement.stop().await;
    Ok(())
}

#[tokio::test]
async fn rtu_framing_end_to_end() -> anyhow::Result<()> {
    let device = start_device(Framing::RtuOverTcp, registry()).await;

    for (name, value) in expected_values() {
        assert_eq!(device.driver.set_point(name, value).await?, value, "{name}");
    }
    let scrape = device.driver.scrape_all().await?;
    for (name, value) in expected_values() {
        assert_eq!(scrape[name], Ok(value), "{name}");
    }

    let health = device.driver.health_check().await?;
    assert_eq!(health.status, HealthStatus::Healthy);
    let details = health.details.expect("details");
    assert_eq!(details["connection_state"], "Connected");
    Ok(())
}
