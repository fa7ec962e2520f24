use crate::config::LayoutConfig;

/// Wrapped label and its estimated extent in world units.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub lines: Vec<String>,
    pub width: f32,
    pub height: f32,
}

pub fn measure_label(text: &str, config: &LayoutConfig) -> TextBlock {
    let font_size = config.font_size.max(1.0);
    let max_width_px = max_label_width_px(config.max_label_width_chars, font_size);
    let mut lines = Vec::new();
    for line in split_lines(text) {
        lines.extend(wrap_line(&line, max_width_px, font_size));
    }
    if lines.is_empty() {
        lines.push(String::new());
    }

    let width = lines
        .iter()
        .map(|line| text_width(line, font_size))
        .fold(0.0, f32::max);
    let height = lines.len() as f32 * font_size * config.label_line_height;
    TextBlock { lines, width, height }
}

/// Leaf box size: padded label, never below the configured minimum.
pub fn node_size(label: &str, config: &LayoutConfig) -> (f32, f32) {
    let block = measure_label(label, config);
    let width = (block.width + config.node_padding_x * 2.0).max(config.min_node_width);
    let height = (block.height + config.node_padding_y * 2.0).max(config.min_node_height);
    (width.ceil(), height.ceil())
}

// Proportional sans-serif advance widths, as a fraction of the font size.
fn char_width_factor(ch: char) -> f32 {
    match ch {
        ' ' => 0.306,
        '\\' | '.' | ',' | ':' | ';' | '|' | '!' | '(' | ')' | '[' | ']' | '{' | '}' => 0.321,
        'I' | 'i' | 'j' | 'l' => 0.24,
        'f' | 'r' | 't' => 0.34,
        '1' => 0.396,
        'M' | 'W' | 'm' | 'w' => 0.87,
        '@' | '#' | '%' | '&' => 0.946,
        'A'..='Z' => 0.66,
        'a'..='z' => 0.56,
        '0'..='9' => 0.6,
        c if !c.is_ascii() && c.len_utf8() >= 3 => 1.0,
        _ => 0.568,
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.replace("<br/>", "\n")
        .replace("<br>", "\n")
        .replace("\\n", "\n")
        .split('\n')
        .map(|line| line.trim().to_string())
        .collect()
}

fn wrap_line(line: &str, max_width: f32, font_size: f32) -> Vec<String> {
    if text_width(line, font_size) <= max_width {
        return vec![line.to_string()];
    }

    let mut lines = Vec::new();
    let mut current = String::new();
    for word in line.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };
        if text_width(&candidate, font_size) > max_width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            current.push_str(word);
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn text_width(text: &str, font_size: f32) -> f32 {
    text.chars().map(char_width_factor).sum::<f32>() * font_size
}

fn max_label_width_px(max_chars: usize, font_size: f32) -> f32 {
    (max_chars.max(1) as f32) * font_size * 0.56
}
