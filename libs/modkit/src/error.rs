use std::fmt;

use thiserror::Error;

use crate::registry::ModuleName;

/// Lifecycle call a module is going through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Initialize,
    Start,
    Stop,
    Unload,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Initialize => "initialize",
            Phase::Start => "start",
            Phase::Stop => "stop",
            Phase::Unload => "unload",
        })
    }
}

/// Structured errors for the module supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown module '{0}'")]
    UnknownModule(String),
    #[error("module '{0}' is already registered")]
    DuplicateModule(String),
    #[error("module '{0}' is not loaded")]
    NotLoaded(String),

    #[error("failed to construct module '{module}'")]
    Construct {
        module: ModuleName,
        #[source]
        source: anyhow::Error,
    },
    #[error("{phase} failed for module '{module}'")]
    Lifecycle {
        module: ModuleName,
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },
    #[error("module '{module}' could not load its dependency '{dependency}'")]
    Dependency {
        module: ModuleName,
        dependency: ModuleName,
        #[source]
        source: Box<SupervisorError>,
    },
    #[error("cyclic dependency detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<ModuleName> },
}

impl SupervisorError {
    /// The innermost supervisor error, skipping `Dependency` wrappers.
    pub fn root(&self) -> &SupervisorError {
        match self {
            SupervisorError::Dependency { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Render an error followed by all of its sources, `a: b: c`.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut next = err.source();
    while let Some(cause) = next {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        next = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let err = SupervisorError::CycleDetected {
            path: vec!["a", "b", "a"],
        };
        assert_eq!(err.to_string(), "cyclic dependency detected: a -> b -> a");
    }

    #[test]
    fn chain_includes_every_source() {
        let err = SupervisorError::Dependency {
            module: "shop",
            dependency: "economy",
            source: Box::new(SupervisorError::Lifecycle {
                module: "economy",
                phase: Phase::Initialize,
                source: anyhow::anyhow!("ledger file missing"),
            }),
        };

        let rendered = error_chain(&err);
        assert_eq!(
            rendered,
            "module 'shop' could not load its dependency 'economy': \
             initialize failed for module 'economy': ledger file missing"
        );
        assert!(matches!(
            err.root(),
            SupervisorError::Lifecycle {
                module: "economy",
                ..
            }
        ));
    }
}
