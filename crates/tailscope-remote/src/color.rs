use std::collections::HashMap;

use tailscope_types::LogPath;

/// Highlight colors in assignment order
pub const PALETTE: [&str; 6] = ["blue", "green", "orange", "brown", "violet", "rose"];

/// Assigns each inclusion of a composite log a stable highlight color
///
/// The first contribution from a (node, path) pair takes the next unused
/// palette color; assignments never change for the log's lifetime and
/// cycle once more inclusions exist than colors.
pub struct ColorPicker {
    assigned: HashMap<(String, String), &'static str>,
    next: usize,
}

impl ColorPicker {
    pub fn new() -> Self {
        Self {
            assigned: HashMap::new(),
            next: 0,
        }
    }

    pub fn color_for(&mut self, node: &str, path: &LogPath) -> &'static str {
        let key = (node.to_string(), path.canonical());
        if let Some(color) = self.assigned.get(&key) {
            return color;
        }
        let color = PALETTE[self.next % PALETTE.len()];
        self.next += 1;
        self.assigned.insert(key, color);
        color
    }
}

impl Default for ColorPicker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_inclusions_get_distinct_colors() {
        let mut picker = ColorPicker::new();
        let first = picker.color_for("local", &LogPath::from("/var/log/a.log"));
        let second = picker.color_for("local", &LogPath::from("/var/log/b.log"));
        let third = picker.color_for("backend-2", &LogPath::from("/var/log/a.log"));

        assert_eq!(first, "blue");
        assert_eq!(second, "green");
        assert_eq!(third, "orange");
    }

    #[test]
    fn test_assignment_is_stable() {
        let mut picker = ColorPicker::new();
        let path = LogPath::from("/var/log/a.log");
        let first = picker.color_for("local", &path);
        picker.color_for("local", &LogPath::from("/var/log/b.log"));
        assert_eq!(picker.color_for("local", &path), first);
    }

    #[test]
    fn test_palette_cycles_past_capacity() {
        let mut picker = ColorPicker::new();
        for index in 0..PALETTE.len() {
            picker.color_for("local", &LogPath::from(format!("/log/{index}")));
        }
        let seventh = picker.color_for("local", &LogPath::from("/log/overflow"));
        assert_eq!(seventh, "blue");
    }
}
