use clap::{Parser, Subcommand};

/// Normalized, cached access to TeamSL league data (basketball-bund.net).
///
/// Every command prints its result as JSON on stdout; logs go to stderr.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log formatting
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    /// Ignore cached entries and do not store the result
    #[arg(long, global = true)]
    pub no_cache: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable output
    Pretty,
    /// One JSON object per line
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Full schedule of a league
    Schedule { league_id: i64 },

    /// Current standings and matches of a league
    Actual { league_id: i64 },

    /// Details of one match, including its venue
    Match { match_id: i64 },

    /// Search the league directory by filters
    Leagues {
        #[arg(long = "verband", value_delimiter = ',')]
        verband_ids: Vec<i64>,
        #[arg(long = "gebiet", value_delimiter = ',')]
        gebiet_ids: Vec<String>,
        #[arg(long = "ligatyp", value_delimiter = ',')]
        ligatyp_ids: Vec<i64>,
        #[arg(long = "geschlecht", value_delimiter = ',')]
        akg_geschlecht_ids: Vec<String>,
        #[arg(long = "altersklasse", value_delimiter = ',')]
        altersklasse_ids: Vec<i64>,
        #[arg(long = "spielklasse", value_delimiter = ',')]
        spielklasse_ids: Vec<i64>,
        #[arg(long, default_value_t = 0)]
        sort_by: i64,
    },

    /// List the regional associations and their league counts
    Verbaende,

    /// Leagues a club plays in within one association
    ClubLeagues {
        club_name: String,
        #[arg(long, default_value_t = 7)]
        verband_id: i64,
    },

    /// All matches of a club within one district, by date
    ClubMatches {
        club_name: String,
        #[arg(long)]
        bezirk_id: i64,
    },
}

fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}
