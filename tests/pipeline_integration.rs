//! End-to-end pipeline tests: mock fetcher through decode into the mixer

mod helpers;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use helpers::{pcm_ramp, MockFetcher};
use wavepipe::stream::{
    CombineStreamer, DecodeStreamer, HttpStreamer, PassThrough, Pipeline, PipelineRole,
};
use wavepipe::{Config, TaskEvent, WorkerState};

fn test_config() -> Config {
    Config {
        http_buffer_size: 1024,
        transfer_buffer_size: 256,
        channel_capacity: 10,
        command_poll_interval_ms: 5,
        max_drain_ms: 1000,
    }
}

fn build_pipeline(
    fetcher: MockFetcher,
    mixer: &CombineStreamer,
    role: PipelineRole,
    config: &Config,
) -> Pipeline {
    helpers::init_tracing();
    let reader = HttpStreamer::new(Box::new(fetcher), config).unwrap();
    let decoder = DecodeStreamer::new(Arc::new(PassThrough), config).unwrap();
    Pipeline::new(role, reader, decoder, mixer, config)
}

async fn wait_for_stopped(pipeline: &mut Pipeline) {
    timeout(Duration::from_secs(5), async {
        loop {
            pipeline.poll_events();
            if pipeline.state() == WorkerState::Stopped {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pipeline did not stop in time");
}

/// Drain `expected` bytes from the mixer while keeping the pipeline polled,
/// so backpressure never wedges the chain mid-test
async fn drain_mixer(mixer: &CombineStreamer, pipeline: &mut Pipeline, expected: usize) -> Vec<u8> {
    let mut combined = Vec::new();
    let mut chunk = vec![0u8; 256];
    timeout(Duration::from_secs(5), async {
        while combined.len() < expected {
            pipeline.poll_events();
            let n = mixer.read(&mut chunk);
            combined.extend_from_slice(&chunk[..n]);
            if n == 0 {
                sleep(Duration::from_millis(5)).await;
            }
        }
    })
    .await
    .expect("mixer did not deliver the expected bytes");
    combined
}

#[tokio::test]
async fn full_chain_delivers_bytes_unchanged() {
    let config = test_config();
    let payload = pcm_ramp(300);

    let mut mixer = CombineStreamer::new(&config).unwrap();
    mixer.start().await.unwrap();

    let (fetcher, probe) = MockFetcher::new(payload.clone(), 128);
    let mut pipeline = build_pipeline(fetcher, &mixer, PipelineRole::Media, &config);
    pipeline.start("mock://media").await.unwrap();

    let combined = drain_mixer(&mixer, &mut pipeline, payload.len()).await;
    assert_eq!(combined, payload);

    // The fetcher completed, the reader stopped itself, the decoder drained,
    // and the pipeline exits on its own.
    wait_for_stopped(&mut pipeline).await;
    assert_eq!(probe.opens(), 1);
    assert_eq!(probe.closes(), 1);

    mixer.stop().await.unwrap();
}

#[tokio::test]
async fn stop_reaches_reader_and_decoder_before_exit() {
    let config = test_config();

    let mut mixer = CombineStreamer::new(&config).unwrap();
    mixer.start().await.unwrap();

    // Endless stream: the pipeline would run forever without a command.
    let (fetcher, probe) = MockFetcher::endless(pcm_ramp(100_000), 64);
    let mut pipeline = build_pipeline(fetcher, &mixer, PipelineRole::Media, &config);
    pipeline.start("mock://live").await.unwrap();
    sleep(Duration::from_millis(50)).await;

    pipeline.stop().await.unwrap();
    wait_for_stopped(&mut pipeline).await;

    // Both inner workers received Stop and wound down.
    let reader = pipeline.reader();
    let decoder = pipeline.decoder();
    timeout(Duration::from_secs(5), async {
        loop {
            let mut reader = reader.lock().await;
            let mut decoder = decoder.lock().await;
            reader.poll_events();
            decoder.poll_events();
            if reader.state() == WorkerState::Stopped && decoder.state() == WorkerState::Stopped {
                break;
            }
            drop(reader);
            drop(decoder);
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("inner workers did not stop");

    assert_eq!(probe.closes(), 1);
    mixer.stop().await.unwrap();
}

#[tokio::test]
async fn graceful_stop_drains_buffered_bytes() {
    let config = test_config();
    let payload = pcm_ramp(200);

    let mut mixer = CombineStreamer::new(&config).unwrap();
    mixer.start().await.unwrap();

    // The connection stays open after the payload, so only a graceful stop
    // ends the stream. The payload fits the reader buffer in one read.
    let (fetcher, probe) = MockFetcher::endless(payload.clone(), payload.len());
    let mut pipeline = build_pipeline(fetcher, &mixer, PipelineRole::Media, &config);
    pipeline.start("mock://live").await.unwrap();

    // Let the payload land in the reader's buffer before asking for a drain.
    sleep(Duration::from_millis(100)).await;
    pipeline.stop_gracefully().await.unwrap();

    let combined = drain_mixer(&mixer, &mut pipeline, payload.len()).await;
    assert_eq!(combined, payload);

    wait_for_stopped(&mut pipeline).await;
    assert_eq!(probe.closes(), 1);
    mixer.stop().await.unwrap();
}

#[tokio::test]
async fn reports_idle_once_the_chain_is_drained() {
    let config = test_config();
    let payload = pcm_ramp(100);

    let mut mixer = CombineStreamer::new(&config).unwrap();
    mixer.start().await.unwrap();

    // Live connection that has nothing further to serve once the payload is
    // through: the pipeline keeps running but moves nothing.
    let (fetcher, _probe) = MockFetcher::endless(payload.clone(), 64);
    let mut pipeline = build_pipeline(fetcher, &mixer, PipelineRole::Media, &config);
    pipeline.start("mock://live").await.unwrap();

    let combined = drain_mixer(&mixer, &mut pipeline, payload.len()).await;
    assert_eq!(combined, payload);

    // With the chain empty, iterations report Idle rather than Running.
    timeout(Duration::from_secs(5), async {
        loop {
            if pipeline.poll_events().contains(&TaskEvent::Idle) {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pipeline never reported idle");

    pipeline.stop().await.unwrap();
    wait_for_stopped(&mut pipeline).await;
    mixer.stop().await.unwrap();
}

#[tokio::test]
async fn failed_open_stops_pipeline_without_output() {
    let config = test_config();

    let mut mixer = CombineStreamer::new(&config).unwrap();
    mixer.start().await.unwrap();

    let (fetcher, probe) = MockFetcher::new(pcm_ramp(50), 32);
    let mut pipeline = build_pipeline(fetcher, &mixer, PipelineRole::Media, &config);
    pipeline.start("mock://refused").await.unwrap();

    // The reader never connects, finds nothing buffered, and stops itself;
    // the pipeline follows.
    wait_for_stopped(&mut pipeline).await;

    assert_eq!(probe.opens(), 0);
    assert_eq!(mixer.output_available(), 0);
    mixer.stop().await.unwrap();
}

#[tokio::test]
async fn announcement_role_feeds_announcement_input() {
    let config = test_config();
    let payload = pcm_ramp(120);

    let mut mixer = CombineStreamer::new(&config).unwrap();
    mixer.start().await.unwrap();

    let (fetcher, _probe) = MockFetcher::new(payload.clone(), 64);
    let mut pipeline = build_pipeline(fetcher, &mixer, PipelineRole::Announcement, &config);
    assert_eq!(pipeline.role(), PipelineRole::Announcement);
    pipeline.start("mock://announce").await.unwrap();

    // A lone announcement passes through unscaled.
    let combined = drain_mixer(&mixer, &mut pipeline, payload.len()).await;
    assert_eq!(combined, payload);

    wait_for_stopped(&mut pipeline).await;
    mixer.stop().await.unwrap();
}
