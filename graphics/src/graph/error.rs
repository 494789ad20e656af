use crate::error::GraphicsError;
use crate::types::QueueType;

/// Errors that can occur during graph construction or execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    EmptyNodeName,
    DuplicateNode(String),
    /// `node` depends on `dependency`, which was never added.
    MissingDependency { node: String, dependency: String },
    /// The nodes that could not be ordered.
    CyclicDependency(Vec<String>),
    NotEnoughCommandLists {
        queue: QueueType,
        requested: usize,
        available: usize,
    },
    /// `update` was called before a successful `build`.
    NotBuilt,
    Graphics(GraphicsError),
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyNodeName => write!(f, "render graph node names cannot be empty"),
            Self::DuplicateNode(name) => write!(f, "render graph node {name:?} added twice"),
            Self::MissingDependency { node, dependency } => {
                write!(f, "node {node:?} depends on undeclared node {dependency:?}")
            }
            Self::CyclicDependency(nodes) => {
                write!(f, "render graph contains cyclic dependency between {nodes:?}")
            }
            Self::NotEnoughCommandLists {
                queue,
                requested,
                available,
            } => write!(
                f,
                "{requested} {} command lists requested, {available} available",
                queue.name()
            ),
            Self::NotBuilt => write!(f, "render graph has not been built"),
            Self::Graphics(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for GraphError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Graphics(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GraphicsError> for GraphError {
    fn from(e: GraphicsError) -> Self {
        Self::Graphics(e)
    }
}
