use std::fmt;
use std::time::Duration;

use crate::definition::migration::MigrationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationResult {
    pub id: MigrationId,
    pub name: String,
    pub direction: Direction,
    pub elapsed: Duration,
}

impl fmt::Display for MigrationResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} ({}) took {:.3}s",
            self.id,
            self.name,
            self.direction,
            self.elapsed.as_secs_f32()
        )
    }
}
