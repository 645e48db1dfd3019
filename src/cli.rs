use clap::{Parser, Subcommand};

/// Gatekeeper: gate access tokens and parking allocation
#[derive(Parser)]
#[command(name = "gatekeeper", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gate server
    Serve {
        /// Port to bind (overrides GATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the configured slot layout
    Layout,

    /// Quote the entry fee for a vehicle
    Fee {
        /// TRUCK, VAN, CAR, BIKE, ...
        #[arg(long)]
        category: String,
        /// VISITOR or REGULAR
        #[arg(long, default_value = "VISITOR")]
        visit_type: String,
    },
}
