use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type WorkflowId = Uuid;
pub type NodeId = Uuid;

/// Port used by connections that do not name one.
pub const DEFAULT_PORT: &str = "default";

/// Complete, persisted workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: NodeDefinition) -> NodeId {
        let id = node.id;
        self.nodes.push(node);
        id
    }

    /// Connect `from`'s implicit default output to `to`.
    pub fn connect(&mut self, from_node: NodeId, to_node: NodeId) {
        self.connections.push(Connection {
            from_node,
            from_port: None,
            to_node,
        });
    }

    /// Connect a named output port of `from` to `to`.
    pub fn connect_port(&mut self, from_node: NodeId, port: impl Into<String>, to_node: NodeId) {
        self.connections.push(Connection {
            from_node,
            from_port: Some(port.into()),
            to_node,
        });
    }

    pub fn find_node(&self, id: NodeId) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: NodeId,
    /// Display name; never used for identity.
    #[serde(default)]
    pub name: Option<String>,
    /// Registry key of the backing function.
    pub function: String,
    #[serde(default)]
    pub inputs: Vec<InputMapping>,
    #[serde(default)]
    pub dictionary_inputs: Vec<DictionaryMapping>,
    #[serde(default)]
    pub outputs: Vec<OutputMapping>,
    /// Overrides the ports declared by the function signature when non-empty.
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub merge_output_with_input: bool,
}

impl NodeDefinition {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: None,
            function: function.into(),
            inputs: Vec::new(),
            dictionary_inputs: Vec::new(),
            outputs: Vec::new(),
            ports: Vec::new(),
            position: None,
            merge_output_with_input: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Fill parameter `to` from expression `from`.
    pub fn with_input(mut self, to: impl Into<String>, from: impl Into<String>) -> Self {
        self.inputs.push(InputMapping {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn with_dictionary_entry(
        mut self,
        parameter: impl Into<String>,
        key: impl Into<String>,
        from: impl Into<String>,
    ) -> Self {
        self.dictionary_inputs.push(DictionaryMapping {
            parameter: parameter.into(),
            key: key.into(),
            from: from.into(),
        });
        self
    }

    /// Expose result path `from` as `output.<to>`.
    pub fn with_output(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.outputs.push(OutputMapping {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn with_ports<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ports = ports.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn merging_output_with_input(mut self) -> Self {
        self.merge_output_with_input = true;
        self
    }

    pub fn input_for(&self, parameter: &str) -> Option<&str> {
        self.inputs
            .iter()
            .find(|m| m.to == parameter)
            .map(|m| m.from.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMapping {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMapping {
    pub from: String,
    pub to: String,
}

/// One entry of a map-typed parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryMapping {
    pub parameter: String,
    pub key: String,
    pub from: String,
}

/// Connection between nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub from_node: NodeId,
    #[serde(default)]
    pub from_port: Option<String>,
    pub to_node: NodeId,
}

impl Connection {
    pub fn port(&self) -> &str {
        self.from_port.as_deref().unwrap_or(DEFAULT_PORT)
    }
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}
