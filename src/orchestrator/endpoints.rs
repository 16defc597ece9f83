use std::collections::HashSet;
use std::fmt;

/// Fixed identity of one logical endpoint. `ordinal` is its slot in the
/// round-robin cycle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    alias: String,
    ordinal: usize,
}

impl Endpoint {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.alias, self.ordinal)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum EndpointSetError {
    Empty,
    DuplicateAlias { alias: String },
}

impl fmt::Display for EndpointSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "endpoint set must contain at least one alias"),
            Self::DuplicateAlias { alias } => {
                write!(f, "endpoint alias '{alias}' is listed more than once")
            }
        }
    }
}

impl std::error::Error for EndpointSetError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointSet {
    endpoints: Vec<Endpoint>,
}

impl EndpointSet {
    pub fn new<I, S>(aliases: I) -> Result<Self, EndpointSetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut endpoints = Vec::new();
        for alias in aliases {
            let alias = alias.into();
            if !seen.insert(alias.clone()) {
                return Err(EndpointSetError::DuplicateAlias { alias });
            }
            endpoints.push(Endpoint {
                ordinal: endpoints.len(),
                alias,
            });
        }

        if endpoints.is_empty() {
            return Err(EndpointSetError::Empty);
        }
        Ok(Self { endpoints })
    }

    pub fn find(&self, alias: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|endpoint| endpoint.alias == alias)
    }

    pub fn get(&self, ordinal: usize) -> Option<&Endpoint> {
        self.endpoints.get(ordinal)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    pub fn aliases(&self) -> Vec<&str> {
        self.endpoints.iter().map(Endpoint::alias).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{EndpointSet, EndpointSetError};

    #[test]
    fn ordinals_follow_argument_order() {
        let set = EndpointSet::new(["s03", "s01", "s02"]).expect("set should build");
        assert_eq!(set.len(), 3);
        assert_eq!(set.find("s03").map(|e| e.ordinal()), Some(0));
        assert_eq!(set.find("s02").map(|e| e.ordinal()), Some(2));
        assert_eq!(set.get(1).map(|e| e.alias()), Some("s01"));
        assert_eq!(set.aliases(), vec!["s03", "s01", "s02"]);
    }

    #[test]
    fn unknown_alias_is_not_found() {
        let set = EndpointSet::new(["s01", "s02"]).expect("set should build");
        assert!(set.find("s09").is_none());
        assert!(set.get(2).is_none());
    }

    #[test]
    fn rejects_empty_and_duplicate_sets() {
        assert_eq!(
            EndpointSet::new(Vec::<String>::new()),
            Err(EndpointSetError::Empty)
        );
        assert_eq!(
            EndpointSet::new(["s01", "s01"]),
            Err(EndpointSetError::DuplicateAlias {
                alias: "s01".to_owned()
            })
        );
    }
}
