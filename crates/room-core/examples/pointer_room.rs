//! Two participants in one in-process room
//!
//! Alice and Bob join a `MemoryRoom`. Bob drags a short stroke across the
//! canvas; Alice's renderer logs the marks it is asked to draw, in Bob's
//! colour. Room configuration is read from the `HUDDLE_*` environment
//! variables when present.
//!
//! ```text
//! HUDDLE_LOG=debug cargo run --example pointer_room
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, Level};

use huddle_room_core::prelude::*;
use huddle_room_core::{color_for, setup_logging, Color, LoggingConfig};

/// Renderer that logs instead of drawing
struct LogRenderer {
    owner: &'static str,
}

impl Renderer for LogRenderer {
    fn attach(&self, track_id: &TrackId, surface: &Surface) {
        info!("[{}] attach {} to {}", self.owner, track_id, surface);
    }

    fn detach(&self, track_id: &TrackId) {
        info!("[{}] detach {}", self.owner, track_id);
    }

    fn draw_mark(&self, surface: &Surface, color: Color, x: f64, y: f64) {
        info!(
            "[{}] mark on {} at ({:.0}, {:.0}) in {}",
            self.owner,
            surface,
            x,
            y,
            color.to_hex()
        );
    }
}

fn participant(
    config: &CoordinatorConfig,
    room: &MemoryRoom,
    owner: &'static str,
) -> anyhow::Result<Arc<SessionCoordinator>> {
    let coordinator = SessionCoordinatorBuilder::new()
        .with_config(config.clone())
        .with_transport(Arc::new(room.clone()))
        .with_credentials(Arc::new(StaticCredentialProvider::new("demo-token")))
        .with_renderer(Arc::new(LogRenderer { owner }))
        .build()?;

    coordinator
        .subscribe(move |event| {
            info!("[{}] {:?}", owner, event);
            Ok(())
        })
        .keep();

    Ok(coordinator)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging(LoggingConfig::new(Level::INFO, "pointer_room").with_env()?)?;

    let config = CoordinatorConfig::from_env()?;
    let room = MemoryRoom::new(config.room_name.clone());

    let alice = participant(&config, &room, "alice")?;
    let bob = participant(&config, &room, "bob")?;

    alice
        .connect(
            SessionConfig::new("alice", "Alice")
                .with_track(TrackDescriptor::audio("alice-mic"))
                .with_track(TrackDescriptor::data("alice-pointer")),
        )
        .await?;
    let session = bob
        .connect(SessionConfig::new("bob", "Bob").with_track(TrackDescriptor::data("bob-pointer")))
        .await?;

    info!(
        "bob sees {} other participant(s); his pointer colour is {}",
        session.participant_count(),
        color_for(&TrackId::from("bob-pointer")).to_hex()
    );

    // let alice's event loop pick up bob's publication
    tokio::time::sleep(Duration::from_millis(50)).await;

    for step in 0..5 {
        let x = 100.0 + 20.0 * step as f64;
        bob.send_pointer(true, x, 80.0)?;
    }
    bob.send_pointer(false, 200.0, 80.0)?;

    bob.disconnect().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    alice.disconnect().await?;

    info!("room '{}' is empty again: {:?}", room.name(), room.members());
    Ok(())
}
