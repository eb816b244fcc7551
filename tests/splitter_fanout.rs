//! Scenario 6 (spec §8): one upstream PMU, two downstream PDCs attached through a Splitter.
//! Both downstream PDCs must see the same config and the same data-frame payloads once
//! streaming, in order.

use std::time::Duration;

use c37118::frame::data::{DataFrame, Phasor, StationData, StatWord};
use c37118::frame::Frame;
use c37118::{Pdc, Pmu, Splitter};
use tokio::time::timeout;

fn sample_data_frame(pmu_id: u16, tick: u32) -> DataFrame {
    DataFrame {
        pmu_id,
        soc: 1_000_000_000 + tick,
        frac_sec: 0,
        time_quality: 0,
        stations: vec![StationData {
            stat: StatWord::empty(),
            phasors: vec![Phasor::Polar {
                magnitude: f64::from(tick),
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
async fn two_downstream_pdcs_see_the_same_stream() {
    let upstream = Pmu::new(7, "127.0.0.1", 0, "UPSTREAM", 10);
    upstream.run().await.expect("upstream pmu binds");
    let upstream_addr = upstream.local_addr().await.expect("upstream bound");

    let splitter = Splitter::new("127.0.0.1", upstream_addr.port(), "127.0.0.1", 0, 7);
    splitter.run().await.expect("splitter connects and binds");

    // Give the splitter's upstream loop time to connect, fetch header/config, and bind its
    // downstream listener before PDCs attach.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let downstream_addr = splitter
        .local_addr()
        .await
        .expect("splitter bound a downstream address");

    let pdc_a = Pdc::new(1, "127.0.0.1", downstream_addr.port());
    let pdc_b = Pdc::new(2, "127.0.0.1", downstream_addr.port());
    pdc_a.run().await.expect("pdc a connects");
    pdc_b.run().await.expect("pdc b connects");

    for pdc in [&pdc_a, &pdc_b] {
        let config = timeout(Duration::from_secs(2), pdc.get_config())
            .await
            .expect("get_config did not hang");
        assert!(config.is_some(), "splitter must forward the cached config");
    }

    pdc_a.start().await.expect("pdc a start sent");
    pdc_b.start().await.expect("pdc b start sent");

    // Let the splitter notice both downstream clients are streaming and turn the upstream
    // transmission on before the test starts producing data frames.
    tokio::time::sleep(Duration::from_millis(100)).await;

    for tick in 0..5 {
        upstream
            .send(&Frame::Data(sample_data_frame(7, tick)))
            .await
            .expect("upstream send succeeds");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for pdc in [&pdc_a, &pdc_b] {
        for tick in 0..5 {
            let frame = timeout(Duration::from_secs(2), pdc.get())
                .await
                .expect("data frame arrived before timeout")
                .expect("connection must not drop mid-stream");
            assert_eq!(frame.soc, 1_000_000_000 + tick);
        }
    }

    pdc_a.quit().await;
    pdc_b.quit().await;
    splitter.stop();
    upstream.stop();
}
