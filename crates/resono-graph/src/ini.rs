//! Parser for the INI-like graph file format.
//!
//! A graph file is a sequence of sections, one per plugin:
//!
//! ```text
//! [eq_left]
//! library=builtin
//! label=eq2
//! purpose=playback
//! disable=(equal? dsp_name "")
//! input_0={src_left}
//! input_1=2.0
//! output_2={eq_out}
//! ```
//!
//! Port keys are `input_N` / `output_N` where `N` is the wire index the
//! module sees. Values of the form `{name}` declare audio flows, `<name>`
//! declare control flows, and a bare float is the literal init value of an
//! unconnected control input. Flow names are file-global: each must be
//! produced by exactly one output and consumed by exactly one input of the
//! same type. `;` and `#` start comment lines.

use crate::desc::{Flow, FlowId, GraphDescription, PluginDesc, PluginId, Port, PortDirection, PortType};
use crate::expr::{ExprError, Expression};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from parsing a graph file.
#[derive(Debug, Error)]
pub enum GraphParseError {
    /// A line outside any section, or other malformed line.
    #[error("line {line}: {message}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },
    /// A plugin section is missing a required key.
    #[error("plugin '{plugin}' is missing required key '{key}'")]
    MissingKey {
        /// Section title.
        plugin: String,
        /// The absent key.
        key: &'static str,
    },
    /// Two ports in one plugin used the same index.
    #[error("plugin '{plugin}' declares port {index} twice")]
    DuplicatePort {
        /// Section title.
        plugin: String,
        /// Conflicting port index.
        index: usize,
    },
    /// A flow has two producers or two consumers.
    #[error("flow '{name}' has more than one {end}")]
    FlowEndpointTaken {
        /// Flow name.
        name: String,
        /// Which endpoint was duplicated (`producer`/`consumer`).
        end: &'static str,
    },
    /// A flow is missing its producer or consumer.
    #[error("flow '{name}' has no {end}")]
    DanglingFlow {
        /// Flow name.
        name: String,
        /// The missing endpoint.
        end: &'static str,
    },
    /// An output port carried a literal value.
    #[error("plugin '{plugin}' output port {index} must name a flow")]
    LiteralOutput {
        /// Section title.
        plugin: String,
        /// Offending port index.
        index: usize,
    },
    /// The disable expression failed to parse.
    #[error("plugin '{plugin}': {source}")]
    Disable {
        /// Section title.
        plugin: String,
        /// Parse failure.
        #[source]
        source: ExprError,
    },
}

/// One pending port parsed from a section, before indices are validated.
struct RawPort {
    index: usize,
    direction: PortDirection,
    value: RawPortValue,
    line: usize,
}

enum RawPortValue {
    AudioFlow(String),
    ControlFlow(String),
    Literal(f32),
}

/// Parses a graph file into a [`GraphDescription`].
pub fn parse_graph(text: &str) -> Result<GraphDescription, GraphParseError> {
    let mut desc = GraphDescription::default();
    let mut flow_ids: HashMap<String, FlowId> = HashMap::new();

    let mut current: Option<(String, Vec<(String, String, usize)>)> = None;
    let mut sections: Vec<(String, Vec<(String, String, usize)>)> = Vec::new();

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        let lineno = lineno + 1;
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(title) = line.strip_prefix('[') {
            let title = title.strip_suffix(']').ok_or(GraphParseError::Malformed {
                line: lineno,
                message: "unterminated section header".into(),
            })?;
            if let Some(section) = current.take() {
                sections.push(section);
            }
            current = Some((title.trim().to_string(), Vec::new()));
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(GraphParseError::Malformed {
                line: lineno,
                message: format!("expected 'key=value', got '{line}'"),
            });
        };
        let Some((_, entries)) = current.as_mut() else {
            return Err(GraphParseError::Malformed {
                line: lineno,
                message: "key before any section header".into(),
            });
        };
        entries.push((key.trim().to_string(), value.trim().to_string(), lineno));
    }
    if let Some(section) = current.take() {
        sections.push(section);
    }

    for (title, entries) in sections {
        let plugin_id = PluginId(desc.plugins.len());
        let plugin = parse_section(&title, &entries, plugin_id, &mut desc.flows, &mut flow_ids)?;
        desc.plugins.push(plugin);
    }

    // Every flow needs one producer and one consumer.
    for flow in &desc.flows {
        if flow.from.is_none() {
            return Err(GraphParseError::DanglingFlow {
                name: flow.name.clone(),
                end: "producer",
            });
        }
        if flow.to.is_none() {
            return Err(GraphParseError::DanglingFlow {
                name: flow.name.clone(),
                end: "consumer",
            });
        }
    }

    Ok(desc)
}

fn parse_section(
    title: &str,
    entries: &[(String, String, usize)],
    plugin_id: PluginId,
    flows: &mut Vec<Flow>,
    flow_ids: &mut HashMap<String, FlowId>,
) -> Result<PluginDesc, GraphParseError> {
    let mut library = None;
    let mut label = None;
    let mut purpose = None;
    let mut disable_expr = None;
    let mut raw_ports: Vec<RawPort> = Vec::new();

    for (key, value, line) in entries {
        match key.as_str() {
            "library" => library = Some(value.clone()),
            "label" => label = Some(value.clone()),
            "purpose" => purpose = Some(value.clone()),
            "disable" => {
                disable_expr =
                    Some(
                        Expression::parse(value).map_err(|source| GraphParseError::Disable {
                            plugin: title.to_string(),
                            source,
                        })?,
                    );
            }
            _ => {
                let (direction, index) = parse_port_key(key, *line)?;
                let value = parse_port_value(value, *line)?;
                raw_ports.push(RawPort {
                    index,
                    direction,
                    value,
                    line: *line,
                });
            }
        }
    }

    let library = library.ok_or(GraphParseError::MissingKey {
        plugin: title.to_string(),
        key: "library",
    })?;
    let label = label.ok_or(GraphParseError::MissingKey {
        plugin: title.to_string(),
        key: "label",
    })?;

    // Ports must form a dense 0..n index range.
    raw_ports.sort_by_key(|p| p.index);
    let mut ports = Vec::with_capacity(raw_ports.len());
    for (expected, raw) in raw_ports.into_iter().enumerate() {
        if raw.index != expected {
            if raw.index < expected {
                return Err(GraphParseError::DuplicatePort {
                    plugin: title.to_string(),
                    index: raw.index,
                });
            }
            return Err(GraphParseError::Malformed {
                line: raw.line,
                message: format!("port indices must be contiguous; expected {expected}, got {}", raw.index),
            });
        }

        let port = match raw.value {
            RawPortValue::Literal(init_value) => {
                if raw.direction == PortDirection::Output {
                    return Err(GraphParseError::LiteralOutput {
                        plugin: title.to_string(),
                        index: raw.index,
                    });
                }
                Port {
                    direction: raw.direction,
                    port_type: PortType::Control,
                    flow: None,
                    init_value,
                }
            }
            RawPortValue::AudioFlow(name) => Port {
                direction: raw.direction,
                port_type: PortType::Audio,
                flow: Some(intern_flow(
                    flows,
                    flow_ids,
                    &name,
                    PortType::Audio,
                    plugin_id,
                    raw.index,
                    raw.direction,
                )?),
                init_value: 0.0,
            },
            RawPortValue::ControlFlow(name) => Port {
                direction: raw.direction,
                port_type: PortType::Control,
                flow: Some(intern_flow(
                    flows,
                    flow_ids,
                    &name,
                    PortType::Control,
                    plugin_id,
                    raw.index,
                    raw.direction,
                )?),
                init_value: 0.0,
            },
        };
        ports.push(port);
    }

    Ok(PluginDesc {
        title: title.to_string(),
        library,
        label,
        purpose,
        disable_expr,
        ports,
    })
}

fn parse_port_key(key: &str, line: usize) -> Result<(PortDirection, usize), GraphParseError> {
    let (direction, rest) = if let Some(rest) = key.strip_prefix("input_") {
        (PortDirection::Input, rest)
    } else if let Some(rest) = key.strip_prefix("output_") {
        (PortDirection::Output, rest)
    } else {
        return Err(GraphParseError::Malformed {
            line,
            message: format!("unknown key '{key}'"),
        });
    };
    let index = rest.parse::<usize>().map_err(|_| GraphParseError::Malformed {
        line,
        message: format!("invalid port index in key '{key}'"),
    })?;
    Ok((direction, index))
}

fn parse_port_value(value: &str, line: usize) -> Result<RawPortValue, GraphParseError> {
    if value.starts_with('{') && value.ends_with('}') {
        return Ok(RawPortValue::AudioFlow(value.to_string()));
    }
    if value.starts_with('<') && value.ends_with('>') {
        return Ok(RawPortValue::ControlFlow(value.to_string()));
    }
    value
        .parse::<f32>()
        .map(RawPortValue::Literal)
        .map_err(|_| GraphParseError::Malformed {
            line,
            message: format!("port value '{value}' is neither a flow nor a number"),
        })
}

/// Finds or creates the flow for `name`, recording this port as one of its
/// endpoints.
fn intern_flow(
    flows: &mut Vec<Flow>,
    flow_ids: &mut HashMap<String, FlowId>,
    name: &str,
    port_type: PortType,
    plugin: PluginId,
    port_index: usize,
    direction: PortDirection,
) -> Result<FlowId, GraphParseError> {
    let id = match flow_ids.get(name) {
        // The bracket style is part of the name, so a reused name always
        // carries the same port type.
        Some(&id) => {
            debug_assert_eq!(flows[id.index()].port_type, port_type);
            id
        }
        None => {
            let id = FlowId(flows.len());
            flows.push(Flow {
                port_type,
                name: name.to_string(),
                from: None,
                to: None,
            });
            flow_ids.insert(name.to_string(), id);
            id
        }
    };

    let flow = &mut flows[id.index()];
    match direction {
        PortDirection::Output => {
            if flow.from.is_some() {
                return Err(GraphParseError::FlowEndpointTaken {
                    name: name.to_string(),
                    end: "producer",
                });
            }
            flow.from = Some((plugin, port_index));
        }
        PortDirection::Input => {
            if flow.to.is_some() {
                return Err(GraphParseError::FlowEndpointTaken {
                    name: name.to_string(),
                    end: "consumer",
                });
            }
            flow.to = Some((plugin, port_index));
        }
    }
    Ok(id)
}
