use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Trendline — precomputed workspace analytics with a TTL'd trend cache
#[derive(Parser)]
#[command(name = "trendlined", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the analytics server
    Serve {
        /// Port to bind
        #[arg(short, long, default_value = "8090")]
        port: u16,
    },

    /// Run one expiry sweep over the trend cache and exit
    Sweep,

    /// Invalidate one cached trend (e.g. after a bulk data correction).
    ///
    /// Removes the durable row only: a running server keeps serving its
    /// in-memory mirror of the entry until that entry's TTL passes. Use the
    /// admin invalidate endpoint when the busting must be immediate.
    Invalidate {
        #[arg(long)]
        workspace_id: Uuid,
        /// One of: executions, users, credits, success_rate, duration
        #[arg(long)]
        metric: String,
        /// One of: 7d, 30d, 90d, 1y, custom:<days>
        #[arg(long)]
        timeframe: String,
    },
}
