use std::collections::{BTreeMap, VecDeque};

/// Directed graph of verb implications, stored as `verb -> verbs implying it`.
/// Implication is transitive: anything that implies `edit` also implies what
/// `edit` implies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImplicationGraph {
    implied_by: BTreeMap<String, Vec<String>>,
}

impl Default for ImplicationGraph {
    fn default() -> Self {
        let table = [
            ("view", &["submit", "edit", "admin"][..]),
            ("submit", &["edit", "publish", "admin"][..]),
            ("edit", &["publish", "admin"][..]),
        ];
        Self::new(
            table
                .iter()
                .map(|(verb, by)| (verb.to_string(), by.iter().map(|s| s.to_string()).collect()))
                .collect(),
        )
    }
}

impl ImplicationGraph {
    pub fn new(implied_by: BTreeMap<String, Vec<String>>) -> Self {
        Self { implied_by }
    }

    /// Verbs that imply `verb` directly.
    pub fn direct(&self, verb: &str) -> &[String] {
        self.implied_by.get(verb).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Every verb that implies `verb`, nearest first, excluding `verb` itself.
    /// Cycles in a configured table are tolerated.
    pub fn implied_by(&self, verb: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut queue: VecDeque<&str> = VecDeque::from([verb]);
        while let Some(current) = queue.pop_front() {
            for next in self.direct(current) {
                if next != verb && !out.contains(next) {
                    out.push(next.clone());
                    queue.push_back(next.as_str());
                }
            }
        }
        out
    }

    /// `verb` followed by everything implying it.
    pub fn expand(&self, verb: &str) -> Vec<String> {
        let mut out = vec![verb.to_string()];
        out.extend(self.implied_by(verb));
        out
    }
}
