use serde_json::{json, Value};

/// `_id` used by the filter that can never match a stored document.
pub const NEVER_MATCH_ID: &str = "__iNeverMatch";

/// Store-level equivalent of an access decision.
#[derive(Clone, Debug, PartialEq)]
pub enum Criteria {
    /// Every document is permitted.
    All,
    /// No document is permitted.
    Nothing,
    /// Permitted documents are exactly those matching the filter.
    Filter(Value),
}

impl Criteria {
    /// Disjunction of `clauses`. An empty disjunction is rendered as the
    /// all-matching `{}` rather than an empty `$or`, which the store rejects.
    pub fn any_of(mut clauses: Vec<Value>) -> Self {
        match clauses.len() {
            0 => Criteria::All,
            1 => Criteria::Filter(clauses.remove(0)),
            _ => Criteria::Filter(json!({ "$or": clauses })),
        }
    }

    pub fn never_match() -> Value {
        json!({ "_id": NEVER_MATCH_ID })
    }

    pub fn to_filter(&self) -> Value {
        match self {
            Criteria::All => json!({}),
            Criteria::Nothing => Self::never_match(),
            Criteria::Filter(filter) => filter.clone(),
        }
    }

    /// Restrict a caller's query to what these criteria permit.
    pub fn restrict(&self, query: Value) -> Value {
        match self {
            Criteria::All => query,
            Criteria::Nothing => Self::never_match(),
            Criteria::Filter(filter) => {
                if query.as_object().map_or(false, |q| q.is_empty()) {
                    filter.clone()
                } else {
                    json!({ "$and": [query, filter] })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_of_shapes() {
        assert_eq!(Criteria::any_of(vec![]), Criteria::All);
        assert_eq!(
            Criteria::any_of(vec![json!({ "a": 1 })]),
            Criteria::Filter(json!({ "a": 1 }))
        );
        assert_eq!(
            Criteria::any_of(vec![json!({ "a": 1 }), json!({ "b": 2 })]).to_filter(),
            json!({ "$or": [{ "a": 1 }, { "b": 2 }] })
        );
    }

    #[test]
    fn test_restrict() {
        let query = json!({ "type": "article" });
        assert_eq!(Criteria::All.restrict(query.clone()), query);
        assert_eq!(
            Criteria::Nothing.restrict(query.clone()),
            json!({ "_id": NEVER_MATCH_ID })
        );
        assert_eq!(
            Criteria::Filter(json!({ "published": true })).restrict(query.clone()),
            json!({ "$and": [{ "type": "article" }, { "published": true }] })
        );
        assert_eq!(
            Criteria::Filter(json!({ "published": true })).restrict(json!({})),
            json!({ "published": true })
        );
    }
}
