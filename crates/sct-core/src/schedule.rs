//! Deterministic domain and guideline assignment per item index.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ClinicalDomain, DomainError, Guideline};

/// Invalid domain or guideline configuration. Always fatal at startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    /// The distribution names no domain at all
    #[error("No domains configured")]
    Empty,

    #[error("Invalid domain in distribution: {0}")]
    Domain(#[from] DomainError),

    /// Weight is zero or not an integer
    #[error("Invalid weight '{weight}' for domain {domain}: must be a positive integer")]
    Weight { domain: String, weight: String },

    #[error("Unknown guideline '{0}' (expected american, british or european)")]
    Guideline(String),
}

/// One configured domain and its relative weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedDomain {
    pub domain: ClinicalDomain,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Round-robin cycle over configured domains, expanded by weight.
///
/// `HCC:2,Cirrhosis` cycles `HCC, HCC, Cirrhosis, HCC, ...`. The same
/// configuration and item count always yield the same sequence. Weights are
/// kept as cumulative bounds, so a large weight costs nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSchedule {
    entries: Vec<WeightedDomain>,
    /// Exclusive upper bound of each entry's slots within one cycle
    bounds: Vec<u64>,
}

impl DomainSchedule {
    pub fn new(entries: &[WeightedDomain]) -> Result<Self, ScheduleError> {
        let mut checked = Vec::with_capacity(entries.len());
        let mut bounds = Vec::with_capacity(entries.len());
        let mut total = 0u64;

        for entry in entries {
            if entry.weight == 0 {
                return Err(ScheduleError::Weight {
                    domain: entry.domain.to_string(),
                    weight: "0".to_string(),
                });
            }
            total += u64::from(entry.weight);
            bounds.push(total);
            checked.push(WeightedDomain {
                domain: ClinicalDomain::parse(entry.domain.as_str())?,
                weight: entry.weight,
            });
        }

        if checked.is_empty() {
            return Err(ScheduleError::Empty);
        }
        Ok(Self {
            entries: checked,
            bounds,
        })
    }

    /// Parse a comma-separated distribution such as `HCC:2,Cirrhosis_Complications`.
    pub fn parse(spec: &str) -> Result<Self, ScheduleError> {
        Self::new(&parse_distribution(spec)?)
    }

    /// Domain for a zero-based item index.
    pub fn domain_for(&self, index: usize) -> &ClinicalDomain {
        let slot = index as u64 % self.cycle_len();
        let at = self.bounds.partition_point(|bound| *bound <= slot);
        &self.entries[at].domain
    }

    /// Configured entries in order.
    pub fn entries(&self) -> &[WeightedDomain] {
        &self.entries
    }

    /// Items in one full cycle (sum of weights).
    pub fn cycle_len(&self) -> u64 {
        self.bounds.last().copied().unwrap_or(1)
    }
}

/// Parse `NAME[:WEIGHT],...` into weighted entries.
pub fn parse_distribution(spec: &str) -> Result<Vec<WeightedDomain>, ScheduleError> {
    let mut entries = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, weight) = match part.split_once(':') {
            Some((name, raw)) => {
                let weight = raw
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|w| *w > 0)
                    .ok_or_else(|| ScheduleError::Weight {
                        domain: name.trim().to_string(),
                        weight: raw.trim().to_string(),
                    })?;
                (name, weight)
            }
            None => (part, 1),
        };
        entries.push(WeightedDomain {
            domain: ClinicalDomain::parse(name)?,
            weight,
        });
    }

    if entries.is_empty() {
        return Err(ScheduleError::Empty);
    }
    Ok(entries)
}

/// Parse a comma-separated guideline list. Empty input yields no guidelines.
pub fn parse_guidelines(spec: &str) -> Result<Vec<Guideline>, ScheduleError> {
    spec.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|name| Guideline::from_name(name).ok_or_else(|| ScheduleError::Guideline(name.to_string())))
        .collect()
}

/// Guideline for a zero-based item index, cycling independently of domains.
pub fn guideline_for(guidelines: &[Guideline], index: usize) -> Option<Guideline> {
    if guidelines.is_empty() {
        None
    } else {
        Some(guidelines[index % guidelines.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first(schedule: &DomainSchedule, count: usize) -> Vec<&str> {
        (0..count).map(|i| schedule.domain_for(i).as_str()).collect()
    }

    #[test]
    fn test_round_robin() {
        let schedule = DomainSchedule::parse("HCC, Cirrhosis_Complications").unwrap();
        assert_eq!(
            first(&schedule, 3),
            vec!["HCC", "Cirrhosis_Complications", "HCC"]
        );
    }

    #[test]
    fn test_weighted_cycle() {
        let schedule = DomainSchedule::parse("HCC:2,Cirrhosis_Complications").unwrap();
        assert_eq!(
            first(&schedule, 5),
            vec!["HCC", "HCC", "Cirrhosis_Complications", "HCC", "HCC"]
        );
    }

    #[test]
    fn test_schedule_is_reproducible() {
        let a = DomainSchedule::parse("AAA,BBB:3,CCC").unwrap();
        let b = DomainSchedule::parse("AAA,BBB:3,CCC").unwrap();
        assert_eq!(first(&a, 17), first(&b, 17));
        assert_eq!(a.cycle_len(), 5);
    }

    #[test]
    fn test_large_weight_is_not_expanded() {
        let schedule = DomainSchedule::parse("HCC:4000000000,Cirrhosis_Complications").unwrap();
        assert_eq!(schedule.cycle_len(), 4_000_000_001);
        assert_eq!(schedule.entries().len(), 2);
        assert_eq!(schedule.domain_for(0).as_str(), "HCC");
        assert_eq!(schedule.domain_for(3_999_999_999).as_str(), "HCC");
        assert_eq!(
            schedule.domain_for(4_000_000_000).as_str(),
            "Cirrhosis_Complications"
        );
        assert_eq!(schedule.domain_for(4_000_000_001).as_str(), "HCC");
    }

    #[test]
    fn test_empty_distribution_fails() {
        assert_eq!(DomainSchedule::parse(""), Err(ScheduleError::Empty));
        assert_eq!(DomainSchedule::parse(" , "), Err(ScheduleError::Empty));
        assert_eq!(DomainSchedule::new(&[]), Err(ScheduleError::Empty));
    }

    #[test]
    fn test_bad_weight_fails() {
        assert!(matches!(
            DomainSchedule::parse("HCC:0"),
            Err(ScheduleError::Weight { .. })
        ));
        assert!(matches!(
            DomainSchedule::parse("HCC:two"),
            Err(ScheduleError::Weight { .. })
        ));
    }

    #[test]
    fn test_bad_domain_fails() {
        assert!(matches!(
            DomainSchedule::parse("HCC,Liver-Masses"),
            Err(ScheduleError::Domain(_))
        ));
    }

    #[test]
    fn test_guidelines_cycle() {
        let guidelines = parse_guidelines("american, european").unwrap();
        assert_eq!(guideline_for(&guidelines, 0), Some(Guideline::American));
        assert_eq!(guideline_for(&guidelines, 1), Some(Guideline::European));
        assert_eq!(guideline_for(&guidelines, 2), Some(Guideline::American));
        assert_eq!(guideline_for(&[], 5), None);
        assert!(parse_guidelines("").unwrap().is_empty());
        assert!(matches!(
            parse_guidelines("asian"),
            Err(ScheduleError::Guideline(_))
        ));
    }
}
