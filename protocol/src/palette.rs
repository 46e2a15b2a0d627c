use rand::Rng;

/// Fixed palette of 50 distinct hex colors. Assigned to a player once, at
/// creation, by uniform random index, and never changed afterwards. Must
/// stay identical across every instance in the fleet — do not reorder or
/// edit entries, only append-and-never-remove if the palette ever grows.
pub const COLOR_PALETTE: [&str; 50] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
    "#bcf60c", "#fabebe", "#008080", "#e6beff", "#9a6324", "#fffac8", "#800000", "#aaffc3",
    "#808000", "#ffd8b1", "#000075", "#808080", "#ffffff", "#000000", "#a9a9a9", "#ff4500",
    "#2e8b57", "#daa520", "#4682b4", "#9932cc", "#dc143c", "#00ced1", "#ff1493", "#7cfc00",
    "#b8860b", "#8b008b", "#20b2aa", "#cd5c5c", "#4b0082", "#adff2f", "#ff6347", "#40e0d0",
    "#d2691e", "#6a5acd", "#c71585", "#5f9ea0", "#ff8c00", "#8a2be2", "#00fa9a", "#b22222",
    "#1e90ff", "#32cd32",
];

/// Picks a palette entry uniformly at random. Called exactly once, at
/// player creation time.
pub fn random_color() -> &'static str {
    let idx = rand::thread_rng().gen_range(0..COLOR_PALETTE.len());
    COLOR_PALETTE[idx]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn palette_has_exactly_fifty_distinct_entries() {
        let set: HashSet<_> = COLOR_PALETTE.iter().collect();
        assert_eq!(COLOR_PALETTE.len(), 50);
        assert_eq!(set.len(), 50);
    }

    #[test]
    fn random_color_always_picks_from_the_palette() {
        for _ in 0..200 {
            assert!(COLOR_PALETTE.contains(&random_color()));
        }
    }
}
