//! Command-line argument definitions

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Classroom booking dashboard client
#[derive(Parser, Debug)]
#[command(name = "booking-dashboard", version)]
pub struct Cli {
    /// Config file (overrides CONFIG_PATH)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Log in (password from BOOKING_PASSWORD or password_file)
    Login {
        /// Defaults to account.username from the config
        username: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Validate the stored session and print it
    Status,
    /// List classrooms
    Classrooms(ClassroomFilters),
    /// List every bookable classroom
    GlobalClasses,
    /// List your bookings
    MyBookings,
    /// List your scheduled classes
    MyClasses,
    /// Create a booking from a JSON file
    Book { file: PathBuf },
    /// Create an account
    Register {
        username: String,
        email: String,
        role: String,
    },
    /// Authenticated GET of any API path
    Get { path: String },
}

/// Classroom list filters. Counts are minimums.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassroomFilters {
    #[arg(long, value_name = "NAME")]
    pub campus: Option<String>,
    #[arg(long, value_name = "N")]
    pub capacity: Option<u32>,
    #[arg(long, value_name = "N")]
    pub computers: Option<u32>,
    #[arg(long, value_name = "N")]
    pub projectors: Option<u32>,
    #[arg(long, value_name = "N")]
    pub whiteboards: Option<u32>,
    #[arg(long, value_name = "N")]
    pub dusters: Option<u32>,
    #[arg(long, value_name = "N")]
    pub markers: Option<u32>,
    #[arg(long, value_name = "N")]
    pub speakers: Option<u32>,
}

impl ClassroomFilters {
    /// The filters that were given, keyed the way the classroom list expects.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let counts = [
            ("capacity", self.capacity),
            ("computer_count", self.computers),
            ("projector_count", self.projectors),
            ("whiteboard_count", self.whiteboards),
            ("duster_count", self.dusters),
            ("marker_count", self.markers),
            ("speaker_count", self.speakers),
        ];

        let mut query = Vec::new();
        if let Some(campus) = &self.campus {
            query.push(("campus", campus.clone()));
        }
        query.extend(
            counts
                .into_iter()
                .filter_map(|(key, value)| value.map(|v| (key, v.to_string()))),
        );
        query
    }
}
