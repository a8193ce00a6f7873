use std::fmt;
use std::str::FromStr;

/// Runtime commands exposed by the terrain manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerrainCommand {
    /// Recompile page materials against the current shadow state
    UpdateShadows,
}

impl TerrainCommand {
    pub const ALL: [TerrainCommand; 1] = [TerrainCommand::UpdateShadows];

    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateShadows => "update_shadows",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::UpdateShadows => "Updates the terrain shadows.",
        }
    }
}

impl FromStr for TerrainCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|command| command.name() == s)
            .ok_or_else(|| format!("Unknown terrain command: {}", s))
    }
}

impl fmt::Display for TerrainCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_by_name() {
        assert_eq!("update_shadows".parse(), Ok(TerrainCommand::UpdateShadows));
        assert!("update_everything".parse::<TerrainCommand>().is_err());
    }
}
