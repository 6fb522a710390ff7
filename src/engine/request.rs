use serde_json::{Map, Value};

use crate::types::PayloadShape;

pub type Bindings = Map<String, Value>;

/// Parameter bindings decoded from the request body
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Object(Bindings),
    Array(Vec<Bindings>),
    /// Named arrays, in request order
    Groups(Vec<(String, Vec<Bindings>)>),
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Object(Map::new())
    }
}

impl Payload {
    pub fn shape(&self) -> PayloadShape {
        match self {
            Payload::Object(_) => PayloadShape::Object,
            Payload::Array(_) => PayloadShape::Array,
            Payload::Groups(_) => PayloadShape::Groups,
        }
    }
}

/// Everything the engine needs for one execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionRequest {
    pub payload: Payload,
    pub start: Option<i64>,
    pub limited: Option<i64>,
    pub recache: bool,
}

impl ExecutionRequest {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    pub fn object(bindings: Bindings) -> Self {
        Self::new(Payload::Object(bindings))
    }

    pub fn with_paging(mut self, start: Option<i64>, limited: Option<i64>) -> Self {
        self.start = start;
        self.limited = limited;
        self
    }

    pub fn with_recache(mut self, recache: bool) -> Self {
        self.recache = recache;
        self
    }
}
