//! Result reporting and whole-election export.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::election::ElectionState;
use crate::ledger::ChainExport;
use crate::registry::{Candidate, Voter};

/// One candidate's line in the results table.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Standing {
    pub rank: usize,
    pub candidate_id: String,
    pub name: String,
    pub party: String,
    pub votes: u64,
    /// Share of counted votes, 0 when nothing has been counted.
    pub percentage: f64,
}

/// Ranked results computed from sealed votes only.
#[derive(Debug, Clone, Serialize)]
pub struct ElectionResults {
    pub election_name: String,
    pub total_votes: u64,
    pub registered_voters: usize,
    /// Counted votes as a percentage of registered voters.
    pub turnout: f64,
    pub standings: Vec<Standing>,
}

impl ElectionResults {
    /// Ranks candidates by votes, highest first; ties are ordered by
    /// candidate id.
    pub fn compute(
        election_name: &str,
        tally: &BTreeMap<String, u64>,
        candidates: &BTreeMap<String, Candidate>,
        registered_voters: usize,
    ) -> Self {
        let total_votes: u64 = tally.values().sum();
        let mut ranked: Vec<(&String, u64)> = tally.iter().map(|(id, votes)| (id, *votes)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let standings = ranked
            .into_iter()
            .enumerate()
            .map(|(position, (candidate_id, votes))| {
                let (name, party) = candidates
                    .get(candidate_id)
                    .map(|c| (c.name.clone(), c.party.clone()))
                    .unwrap_or_default();
                Standing {
                    rank: position + 1,
                    candidate_id: candidate_id.clone(),
                    name,
                    party,
                    votes,
                    percentage: percent(votes, total_votes),
                }
            })
            .collect();

        Self {
            election_name: election_name.to_string(),
            total_votes,
            registered_voters,
            turnout: percent(total_votes, registered_voters as u64),
            standings,
        }
    }

    /// The leading candidate, if any vote has been counted.
    pub fn leader(&self) -> Option<&Standing> {
        self.standings.first().filter(|s| s.votes > 0)
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

impl fmt::Display for ElectionResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(71);
        writeln!(f, "{rule}")?;
        writeln!(f, "Election Results: {}", self.election_name)?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Total Votes Counted: {}", self.total_votes)?;
        writeln!(f, "Total Registered Voters: {}", self.registered_voters)?;
        writeln!(f, "Voter Turnout: {:.2}%", self.turnout)?;
        writeln!(f)?;
        writeln!(
            f,
            "{:<6} {:<25} {:<20} {:<10} {:<10}",
            "Rank", "Candidate", "Party", "Votes", "Percentage"
        )?;
        writeln!(f, "{}", "-".repeat(71))?;
        for s in &self.standings {
            writeln!(
                f,
                "{:<6} {:<25} {:<20} {:<10} {:.2}%",
                s.rank, s.name, s.party, s.votes, s.percentage
            )?;
        }
        write!(f, "{rule}")
    }
}

/// Complete election snapshot for external consumers. Voters appear in
/// their public view; credentials are never included.
#[derive(Debug, Clone, Serialize)]
pub struct ElectionExport {
    pub election_name: String,
    pub state: ElectionState,
    pub is_active: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub voters: Vec<Voter>,
    pub candidates: Vec<Candidate>,
    pub results: BTreeMap<String, u64>,
    pub blockchain: ChainExport,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> BTreeMap<String, Candidate> {
        [("C1", "Alice", "Blue"), ("C2", "Bob", "Green"), ("C3", "Cat", "Red")]
            .into_iter()
            .map(|(id, name, party)| {
                (
                    id.to_string(),
                    Candidate {
                        candidate_id: id.to_string(),
                        name: name.to_string(),
                        party: party.to_string(),
                        description: String::new(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn ranks_by_votes_then_id() {
        let tally: BTreeMap<String, u64> =
            [("C1".to_string(), 1), ("C2".to_string(), 3), ("C3".to_string(), 1)].into();
        let results = ElectionResults::compute("Board", &tally, &candidates(), 10);

        let order: Vec<_> = results.standings.iter().map(|s| s.candidate_id.as_str()).collect();
        assert_eq!(order, ["C2", "C1", "C3"]);
        assert_eq!(results.standings[0].rank, 1);
        assert_eq!(results.standings[0].name, "Bob");
        assert_eq!(results.total_votes, 5);
        assert!((results.standings[0].percentage - 60.0).abs() < 1e-9);
        assert!((results.turnout - 50.0).abs() < 1e-9);
        assert_eq!(results.leader().map(|s| s.candidate_id.as_str()), Some("C2"));
    }

    #[test]
    fn empty_tally_has_no_leader() {
        let tally: BTreeMap<String, u64> = [("C1".to_string(), 0)].into();
        let results = ElectionResults::compute("Board", &tally, &candidates(), 0);
        assert_eq!(results.turnout, 0.0);
        assert_eq!(results.standings[0].percentage, 0.0);
        assert!(results.leader().is_none());
    }

    #[test]
    fn renders_a_table() {
        let tally: BTreeMap<String, u64> = [("C1".to_string(), 2)].into();
        let table = ElectionResults::compute("Board", &tally, &candidates(), 4).to_string();
        assert!(table.contains("Election Results: Board"));
        assert!(table.contains("Voter Turnout: 50.00%"));
        assert!(table.contains("Alice"));
        assert!(table.contains("100.00%"));
    }
}
