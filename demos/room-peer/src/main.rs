use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use log::{info, warn};
use webrtc::media::Sample;

use ion_room::{media::LocalTrack, RoomConfig, RoomSession, DEFAULT_SIGNAL_URL};

/// One 20ms Opus frame of silence
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];
const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Feed silence into the audio track until the session goes away
async fn silence_task(track: LocalTrack) {
    let mut interval = tokio::time::interval(FRAME_DURATION);
    loop {
        interval.tick().await;
        let sample = Sample {
            data: Bytes::from_static(&OPUS_SILENCE),
            duration: FRAME_DURATION,
            ..Default::default()
        };
        if let Err(e) = track.sample_track().write_sample(&sample).await {
            warn!("stopped writing audio ({e})");
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();
    // usage: room-peer [url] [room] [name]
    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| DEFAULT_SIGNAL_URL.to_owned());
    let room = args.next().unwrap_or_else(|| "test room".to_owned());
    let name = args.next().unwrap_or_else(|| "room-peer".to_owned());

    let mut session = RoomSession::native(RoomConfig::new(url, room, name));
    session.init().await?;
    session.join().await?;

    let audio = LocalTrack::opus("audio", session.peer_id());
    session.set_audio_track(audio.clone());
    let media = session.publish().await?;
    info!("publishing as {} ({})", media.mid, session.peer_id());
    let writer = tokio::spawn(silence_task(audio));

    let mut report = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = report.tick() => {
                let streams: Vec<String> = session.consumers().await.into_iter().map(|m| m.mid).collect();
                info!("subscribed streams: {streams:?}");
            }
        }
    }

    info!("shutting down");
    session.close().await;
    writer.abort();
    Ok(())
}
