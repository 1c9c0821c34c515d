//! Static graph description: plugins, ports, and flows.
//!
//! The description is an arena: plugins and flows live in owned vectors and
//! reference each other through [`PluginId`] / [`FlowId`] indices. IDs are
//! assigned during parsing and stay stable for the life of the description.

use crate::expr::{ExprEnv, Expression};
use tracing::warn;

/// Index of a plugin within its [`GraphDescription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginId(pub(crate) usize);

impl PluginId {
    /// Returns the raw index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of a flow within its [`GraphDescription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId(pub(crate) usize);

impl FlowId {
    /// Returns the raw index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Whether a port consumes or produces data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    /// Data flows into the plugin.
    Input,
    /// Data flows out of the plugin.
    Output,
}

/// What kind of data moves through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    /// Block-rate audio samples.
    Audio,
    /// A single scalar read at configure time.
    Control,
}

/// One port of a plugin.
///
/// A port has exactly one of a flow connection or a literal init value:
/// connected ports carry `flow`, unconnected control inputs carry
/// `init_value`.
#[derive(Debug, Clone)]
pub struct Port {
    /// Input or output.
    pub direction: PortDirection,
    /// Audio or control.
    pub port_type: PortType,
    /// The flow this port participates in, if connected.
    pub flow: Option<FlowId>,
    /// Literal value for an unconnected control input.
    pub init_value: f32,
}

/// A named, typed edge between one output port and one input port.
#[derive(Debug, Clone)]
pub struct Flow {
    /// Type of both endpoints.
    pub port_type: PortType,
    /// The flow name as written in the graph file.
    pub name: String,
    /// Producing `(plugin, port index)`.
    pub from: Option<(PluginId, usize)>,
    /// Consuming `(plugin, port index)`.
    pub to: Option<(PluginId, usize)>,
}

/// Static description of one plugin.
#[derive(Debug, Clone)]
pub struct PluginDesc {
    /// Instance name (the section title in the graph file).
    pub title: String,
    /// Implementation origin; only `builtin` is supported.
    pub library: String,
    /// Implementation key resolved through the plugin registry.
    pub label: String,
    /// Pipeline purpose this plugin belongs to (`playback`, `capture`).
    pub purpose: Option<String>,
    /// Optional expression that disables the plugin when it evaluates true.
    pub disable_expr: Option<Expression>,
    /// Ordered port list; index is the port's wire index.
    pub ports: Vec<Port>,
}

impl PluginDesc {
    /// Whether the plugin is disabled under the given environment.
    ///
    /// A plugin is enabled iff the expression is absent or evaluates to
    /// false. Evaluation errors leave the plugin enabled and are logged.
    pub fn is_disabled(&self, env: &ExprEnv) -> bool {
        match &self.disable_expr {
            None => false,
            Some(expr) => match expr.eval_boolean(env) {
                Ok(disabled) => disabled,
                Err(err) => {
                    warn!(plugin = %self.title, %err, "disable expression failed; keeping plugin enabled");
                    false
                }
            },
        }
    }

    /// Iterator over `(port index, port)` pairs matching a direction and type.
    pub fn ports_of(
        &self,
        direction: PortDirection,
        port_type: PortType,
    ) -> impl Iterator<Item = (usize, &Port)> {
        self.ports
            .iter()
            .enumerate()
            .filter(move |(_, p)| p.direction == direction && p.port_type == port_type)
    }
}

/// The full static graph: an arena of plugins and flows.
#[derive(Debug, Clone, Default)]
pub struct GraphDescription {
    /// All plugins, in file order.
    pub plugins: Vec<PluginDesc>,
    /// All flows, in order of first mention.
    pub flows: Vec<Flow>,
}

impl GraphDescription {
    /// Returns the plugin for an ID.
    pub fn plugin(&self, id: PluginId) -> &PluginDesc {
        &self.plugins[id.0]
    }

    /// Returns the flow for an ID.
    pub fn flow(&self, id: FlowId) -> &Flow {
        &self.flows[id.0]
    }

    /// Enumerates `(id, plugin)` pairs.
    pub fn plugins_with_ids(&self) -> impl Iterator<Item = (PluginId, &PluginDesc)> {
        self.plugins.iter().enumerate().map(|(i, p)| (PluginId(i), p))
    }

    /// Builds the trivial passthrough description used when a device needs
    /// a pipeline but no graph file is configured: one source and one sink
    /// with `num_channels` audio flows between them.
    pub fn mock(purpose: &str, num_channels: usize) -> Self {
        let mut desc = Self::default();
        let mut source_ports = Vec::new();
        let mut sink_ports = Vec::new();
        for ch in 0..num_channels {
            desc.flows.push(Flow {
                port_type: PortType::Audio,
                name: format!("{{tmp:{ch}}}"),
                from: Some((PluginId(0), ch)),
                to: Some((PluginId(1), ch)),
            });
            source_ports.push(Port {
                direction: PortDirection::Output,
                port_type: PortType::Audio,
                flow: Some(FlowId(ch)),
                init_value: 0.0,
            });
            sink_ports.push(Port {
                direction: PortDirection::Input,
                port_type: PortType::Audio,
                flow: Some(FlowId(ch)),
                init_value: 0.0,
            });
        }
        desc.plugins.push(PluginDesc {
            title: "src".into(),
            library: "builtin".into(),
            label: "source".into(),
            purpose: Some(purpose.into()),
            disable_expr: None,
            ports: source_ports,
        });
        desc.plugins.push(PluginDesc {
            title: "sink".into(),
            library: "builtin".into(),
            label: "sink".into(),
            purpose: Some(purpose.into()),
            disable_expr: None,
            ports: sink_ports,
        });
        desc
    }
}
