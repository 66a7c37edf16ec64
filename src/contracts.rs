//! Contract resolver: maps marginal / slice / corner contracts to the world
//! subset they cover.
//!
//! Contracts are ephemeral queries over a world-ledger snapshot, never
//! persisted. Every contract pays $1 per share if any matching world resolves
//! true, so buying a contract means buying the whole basket of matching
//! worlds simultaneously.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::worlds::WorldBits;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Contract {
    /// Bet on one event's outcome, indifferent to all others.
    Marginal { event: usize, outcome: bool },
    /// Bet on a subset of events' outcomes, indifferent to the rest.
    Slice { legs: Vec<(usize, bool)> },
    /// Bet on one exact world.
    Corner { bits: WorldBits },
}

impl Contract {
    /// Indices of the worlds this contract covers, in ledger order.
    pub fn resolve(&self, n_events: usize) -> Result<Vec<usize>> {
        self.validate(n_events)?;
        let count = 1usize << n_events;
        Ok((0..count)
            .filter(|&w| self.matches(WorldBits(w as u32)))
            .collect())
    }

    /// 0/1 indicator vector over all 2^N worlds (the trade basket).
    pub fn indicator(&self, n_events: usize) -> Result<Vec<f64>> {
        self.validate(n_events)?;
        let count = 1usize << n_events;
        Ok((0..count)
            .map(|w| {
                if self.matches(WorldBits(w as u32)) {
                    1.0
                } else {
                    0.0
                }
            })
            .collect())
    }

    /// Contract fair price: the probability mass of the matched worlds.
    pub fn price(&self, probabilities: &[f64], n_events: usize) -> Result<f64> {
        let matched = self.resolve(n_events)?;
        if probabilities.len() != 1usize << n_events {
            return Err(EngineError::InvalidWorldCount {
                expected: 1usize << n_events,
                given: probabilities.len(),
            });
        }
        Ok(matched.iter().map(|&i| probabilities[i]).sum())
    }

    fn matches(&self, bits: WorldBits) -> bool {
        match self {
            Contract::Marginal { event, outcome } => bits.event_is_true(*event) == *outcome,
            Contract::Slice { legs } => legs
                .iter()
                .all(|(event, outcome)| bits.event_is_true(*event) == *outcome),
            Contract::Corner { bits: exact } => bits == *exact,
        }
    }

    fn validate(&self, n_events: usize) -> Result<()> {
        match self {
            Contract::Marginal { event, .. } => {
                if *event >= n_events {
                    return Err(EngineError::UnknownEvent {
                        event: *event,
                        n_events,
                    });
                }
            }
            Contract::Slice { legs } => {
                if legs.is_empty() {
                    return Err(EngineError::EmptySlice);
                }
                let mut seen = 0u32;
                for (event, _) in legs {
                    if *event >= n_events {
                        return Err(EngineError::UnknownEvent {
                            event: *event,
                            n_events,
                        });
                    }
                    if seen & (1 << event) != 0 {
                        return Err(EngineError::DuplicateEvent { event: *event });
                    }
                    seen |= 1 << event;
                }
            }
            Contract::Corner { bits } => {
                if bits.0 >= (1u32 << n_events) {
                    return Err(EngineError::UnknownEvent {
                        event: bits.0 as usize,
                        n_events,
                    });
                }
            }
        }
        Ok(())
    }

    /// Human label for receipts and logs, e.g. `marginal(E0=yes)`.
    pub fn describe(&self, n_events: usize) -> String {
        fn yn(outcome: bool) -> &'static str {
            if outcome {
                "yes"
            } else {
                "no"
            }
        }
        match self {
            Contract::Marginal { event, outcome } => {
                format!("marginal(E{event}={})", yn(*outcome))
            }
            Contract::Slice { legs } => {
                let parts: Vec<String> = legs
                    .iter()
                    .map(|(e, o)| format!("E{e}={}", yn(*o)))
                    .collect();
                format!("slice({})", parts.join(","))
            }
            Contract::Corner { bits } => format!("corner({})", bits.display(n_events)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marginal_covers_half_the_worlds() {
        let c = Contract::Marginal {
            event: 0,
            outcome: true,
        };
        let worlds = c.resolve(3).unwrap();
        assert_eq!(worlds, vec![1, 3, 5, 7]);
        let opposite = Contract::Marginal {
            event: 0,
            outcome: false,
        };
        assert_eq!(opposite.resolve(3).unwrap(), vec![0, 2, 4, 6]);
    }

    #[test]
    fn slice_constrains_only_its_legs() {
        let c = Contract::Slice {
            legs: vec![(0, true), (1, true)],
        };
        // events 0 and 1 true, event 2 free
        assert_eq!(c.resolve(3).unwrap(), vec![3, 7]);
    }

    #[test]
    fn corner_is_a_single_world() {
        let c = Contract::Corner {
            bits: WorldBits(6),
        };
        assert_eq!(c.resolve(3).unwrap(), vec![6]);
    }

    #[test]
    fn out_of_range_event_is_unknown() {
        let c = Contract::Marginal {
            event: 3,
            outcome: true,
        };
        assert_eq!(
            c.resolve(3).unwrap_err(),
            EngineError::UnknownEvent {
                event: 3,
                n_events: 3
            }
        );
        let corner = Contract::Corner {
            bits: WorldBits(8),
        };
        assert!(matches!(
            corner.resolve(3),
            Err(EngineError::UnknownEvent { .. })
        ));
    }

    #[test]
    fn duplicate_slice_leg_is_rejected() {
        let c = Contract::Slice {
            legs: vec![(1, true), (1, false)],
        };
        assert_eq!(
            c.resolve(3).unwrap_err(),
            EngineError::DuplicateEvent { event: 1 }
        );
    }

    #[test]
    fn prices_aggregate_matched_mass() {
        let probs = [0.20, 0.10, 0.15, 0.25, 0.05, 0.05, 0.10, 0.10];
        let marginal = Contract::Marginal {
            event: 0,
            outcome: true,
        };
        let p = marginal.price(&probs, 3).unwrap();
        assert!((p - 0.50).abs() < 1e-12);

        let complement = Contract::Marginal {
            event: 0,
            outcome: false,
        };
        let q = complement.price(&probs, 3).unwrap();
        assert!((p + q - 1.0).abs() < 1e-12);

        let corner = Contract::Corner {
            bits: WorldBits(3),
        };
        assert!((corner.price(&probs, 3).unwrap() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn all_corners_partition_probability() {
        let probs = [0.20, 0.10, 0.15, 0.25, 0.05, 0.05, 0.10, 0.10];
        let total: f64 = (0..8)
            .map(|w| {
                Contract::Corner {
                    bits: WorldBits(w),
                }
                .price(&probs, 3)
                .unwrap()
            })
            .sum();
        assert!((total - 1.0).abs() < 1e-12);
    }
}
