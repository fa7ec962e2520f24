use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Direction {
    #[default]
    #[serde(rename = "TB")]
    TopDown,
    #[serde(rename = "BT")]
    BottomTop,
    #[serde(rename = "LR")]
    LeftRight,
    #[serde(rename = "RL")]
    RightLeft,
}

impl Direction {
    /// Rank direction name as the layered layout expects it.
    pub fn rankdir(self) -> &'static str {
        match self {
            Direction::TopDown => "tb",
            Direction::BottomTop => "bt",
            Direction::LeftRight => "lr",
            Direction::RightLeft => "rl",
        }
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::LeftRight | Direction::RightLeft)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoutingType {
    #[default]
    Orthogonal,
    Polyline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub direction: Direction,
    pub node_spacing: f32,
    pub rank_spacing: f32,
    pub node_padding_x: f32,
    pub node_padding_y: f32,
    pub font_size: f32,
    pub label_line_height: f32,
    pub max_label_width_chars: usize,
    pub min_node_width: f32,
    pub min_node_height: f32,
    pub group_padding: f32,
    pub group_header_height: f32,
    pub grid_size: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            direction: Direction::TopDown,
            node_spacing: 60.0,
            rank_spacing: 80.0,
            node_padding_x: 16.0,
            node_padding_y: 12.0,
            font_size: 14.0,
            label_line_height: 1.4,
            max_label_width_chars: 24,
            min_node_width: 120.0,
            min_node_height: 48.0,
            group_padding: 24.0,
            group_header_height: 32.0,
            grid_size: 10.0,
        }
    }
}

/// Edge router tuning. Penalties are in world units per grid cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub shape_buffer_distance: f32,
    pub port_edge_spacing: f32,
    pub routing_type: RoutingType,
    pub hate_crossings: bool,
    pub segment_penalty: f32,
    pub bend_penalty: f32,
    pub crossing_penalty: f32,
    pub shared_path_penalty: f32,
    pub nudge_orthogonal_segments: bool,
    pub grid_cell: f32,
    pub max_steps: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            shape_buffer_distance: 12.0,
            port_edge_spacing: 10.0,
            routing_type: RoutingType::Orthogonal,
            hate_crossings: true,
            segment_penalty: 1.0,
            bend_penalty: 4.0,
            crossing_penalty: 8.0,
            shared_path_penalty: 2.0,
            nudge_orthogonal_segments: true,
            grid_cell: 10.0,
            max_steps: 200_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Fail the frame on missing geometry instead of skipping the element.
    pub strict: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub layout: LayoutConfig,
    pub routing: RoutingConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LayoutConfigFile {
    direction: Option<Direction>,
    node_spacing: Option<f32>,
    rank_spacing: Option<f32>,
    node_padding_x: Option<f32>,
    node_padding_y: Option<f32>,
    font_size: Option<f32>,
    label_line_height: Option<f32>,
    max_label_width_chars: Option<usize>,
    min_node_width: Option<f32>,
    min_node_height: Option<f32>,
    group_padding: Option<f32>,
    group_header_height: Option<f32>,
    grid_size: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RoutingConfigFile {
    shape_buffer_distance: Option<f32>,
    port_edge_spacing: Option<f32>,
    routing_type: Option<RoutingType>,
    hate_crossings: Option<bool>,
    segment_penalty: Option<f32>,
    bend_penalty: Option<f32>,
    crossing_penalty: Option<f32>,
    shared_path_penalty: Option<f32>,
    nudge_orthogonal_segments: Option<bool>,
    grid_cell: Option<f32>,
    max_steps: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    layout: Option<LayoutConfigFile>,
    routing: Option<RoutingConfigFile>,
    strict: Option<bool>,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let mut config = Config::default();
    let parsed: ConfigFile = serde_json::from_str(contents)?;

    if let Some(layout) = parsed.layout {
        if let Some(v) = layout.direction {
            config.layout.direction = v;
        }
        if let Some(v) = layout.node_spacing {
            config.layout.node_spacing = v;
        }
        if let Some(v) = layout.rank_spacing {
            config.layout.rank_spacing = v;
        }
        if let Some(v) = layout.node_padding_x {
            config.layout.node_padding_x = v;
        }
        if let Some(v) = layout.node_padding_y {
            config.layout.node_padding_y = v;
        }
        if let Some(v) = layout.font_size {
            config.layout.font_size = v;
        }
        if let Some(v) = layout.label_line_height {
            config.layout.label_line_height = v;
        }
        if let Some(v) = layout.max_label_width_chars {
            config.layout.max_label_width_chars = v;
        }
        if let Some(v) = layout.min_node_width {
            config.layout.min_node_width = v;
        }
        if let Some(v) = layout.min_node_height {
            config.layout.min_node_height = v;
        }
        if let Some(v) = layout.group_padding {
            config.layout.group_padding = v;
        }
        if let Some(v) = layout.group_header_height {
            config.layout.group_header_height = v;
        }
        if let Some(v) = layout.grid_size {
            config.layout.grid_size = v;
        }
    }

    if let Some(routing) = parsed.routing {
        if let Some(v) = routing.shape_buffer_distance {
            config.routing.shape_buffer_distance = v;
        }
        if let Some(v) = routing.port_edge_spacing {
            config.routing.port_edge_spacing = v;
        }
        if let Some(v) = routing.routing_type {
            config.routing.routing_type = v;
        }
        if let Some(v) = routing.hate_crossings {
            config.routing.hate_crossings = v;
        }
        if let Some(v) = routing.segment_penalty {
            config.routing.segment_penalty = v;
        }
        if let Some(v) = routing.bend_penalty {
            config.routing.bend_penalty = v;
        }
        if let Some(v) = routing.crossing_penalty {
            config.routing.crossing_penalty = v;
        }
        if let Some(v) = routing.shared_path_penalty {
            config.routing.shared_path_penalty = v;
        }
        if let Some(v) = routing.nudge_orthogonal_segments {
            config.routing.nudge_orthogonal_segments = v;
        }
        if let Some(v) = routing.grid_cell {
            config.routing.grid_cell = v;
        }
        if let Some(v) = routing.max_steps {
            config.routing.max_steps = v;
        }
    }

    if let Some(v) = parsed.strict {
        config.render.strict = v;
    }

    Ok(config)
}
