use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};

/// The first legs always get these colors, in order.
const FIXED_COLORS: [&str; 12] = [
    "#31d3ae", "#1496fd", "#f274a5", "#00f6dc", "#d3b1fa", "#17e4c1", "#9668a2", "#00ffff",
    "#ffc0cb", "#ff9699", "#ca2116", "#009a9a",
];

/// Colors for each leg of a route. Past the fixed colors, new entries are generated randomly the
/// first time they're requested and then remembered, so a leg keeps its color for the lifetime of
/// the palette.
pub struct Palette {
    colors: Vec<String>,
    random: RandomState,
}

impl Palette {
    pub fn new() -> Palette {
        Palette {
            colors: FIXED_COLORS.iter().map(|x| x.to_string()).collect(),
            random: RandomState::new(),
        }
    }

    pub fn color_for_leg(&mut self, idx: usize) -> &str {
        while self.colors.len() <= idx {
            let color = self.random_color(self.colors.len());
            self.colors.push(color);
        }
        &self.colors[idx]
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    fn random_color(&self, idx: usize) -> String {
        let mut hasher = self.random.build_hasher();
        hasher.write_usize(idx);
        format!("#{:06x}", hasher.finish() & 0xffffff)
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::new()
    }
}
