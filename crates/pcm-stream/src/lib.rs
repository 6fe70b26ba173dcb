//! Stream PCM audio to a playback device through a pool of reusable sources.
//!
//! Device sources and buffers are expensive to create and some drivers fail when
//! asked for too many, so they are never destroyed: a [`Context`] keeps them in a
//! bounded [`pool::SourcePool`] and hands them from one [`Player`] to the next.
//!
//! ```no_run
//! use pcm_stream::{Context, output::{CpalDevice, OutputSelection}};
//!
//! let ctx = Context::new(CpalDevice::new(OutputSelection::default()));
//! let file = std::fs::File::open("track.pcm")?;
//! let mut player = ctx.open_player(std::io::BufReader::new(file), 44_100)?;
//! player.play()?;
//! player.wait()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod output;
pub mod player;
pub mod pool;
pub mod soft;
pub mod status;

mod reader;

pub use config::StreamConfig;
pub use context::Context;
pub use device::{BufferId, Device, ErrorCode, SourceId, SourceState};
pub use error::{Error, Fault};
pub use player::Player;
pub use status::{PoolStatus, StatsSnapshot};
