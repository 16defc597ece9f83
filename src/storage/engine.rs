#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageEngine {
    Filesystem,
    Memory,
}

impl StorageEngine {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "fs" | "filesystem" => Some(Self::Filesystem),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filesystem => "fs",
            Self::Memory => "memory",
        }
    }
}
