//! Scenario 5 (spec §8): a PDC connects to a PMU, requests header and config, starts
//! transmission, receives several data frames, stops transmission, and disconnects — data
//! frames must stop flowing once the stop command has been acknowledged by the state
//! transition.

use std::time::Duration;

use c37118::frame::data::{DataFrame, Phasor, StationData, StatWord};
use c37118::frame::Frame;
use c37118::{Pdc, Pmu};
use tokio::time::timeout;

fn sample_data_frame(pmu_id: u16) -> DataFrame {
    DataFrame {
        pmu_id,
        soc: 1_000_000_000,
        frac_sec: 0,
        time_quality: 0,
        stations: vec![StationData {
            stat: StatWord::empty(),
            phasors: vec![Phasor::Polar {
                magnitude: 1.0,
                angle: 0.0,
            }],
            freq: 0.0,
            dfreq: 0.0,
            analogs: vec![0.0],
            digitals: vec![0],
        }],
    }
}

#[tokio::test]
async fn start_then_stop_halts_data_delivery() {
    let pmu = Pmu::new(7, "127.0.0.1", 0, "TESTPMU", 30);
    pmu.run().await.expect("pmu binds");
    let addr = pmu.local_addr().await.expect("pmu bound an address");

    let pdc = Pdc::new(1, "127.0.0.1", addr.port());
    pdc.run().await.expect("pdc connects");

    let header = timeout(Duration::from_secs(2), pdc.get_header())
        .await
        .expect("get_header did not hang");
    assert!(header.is_some(), "PMU must answer a header request");

    let config = timeout(Duration::from_secs(2), pdc.get_config())
        .await
        .expect("get_config did not hang")
        .expect("PMU must answer a config request");
    assert_eq!(config.stations.len(), 1);

    pdc.start().await.expect("start command sent");

    // Give the PMU side a moment to process the command before it starts streaming.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let data = sample_data_frame(7);
    for _ in 0..10 {
        pmu.send(&Frame::Data(data.clone())).await.expect("send succeeds");
    }

    let mut received = 0;
    for _ in 0..10 {
        let frame = timeout(Duration::from_secs(2), pdc.get())
            .await
            .expect("data frame arrived before timeout");
        assert!(frame.is_some(), "connection must not drop mid-stream");
        received += 1;
    }
    assert_eq!(received, 10);

    pdc.stop().await.expect("stop command sent");
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Frames sent after the stop has been processed must not reach this client (§4.4: a client
    // back in `Connected` state is skipped by `send`).
    for _ in 0..5 {
        pmu.send(&Frame::Data(data.clone())).await.expect("send succeeds");
    }

    let post_stop = timeout(Duration::from_millis(300), pdc.get()).await;
    assert!(
        post_stop.is_err(),
        "no data frame should be delivered after transmission was turned off"
    );

    pdc.quit().await;
    pmu.stop();
}
