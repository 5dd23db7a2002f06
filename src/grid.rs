use serde::Deserialize;

/// Logical shape of the answer grid and the weights that govern how it is
/// projected onto rectified pixels. One immutable value shared by every
/// stage; per-image statistics never live here.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GridSpec {
    pub subjects: usize,
    pub options: usize,
    pub questions: usize,
    /// Questions per visual group; spacer rows separate the groups.
    pub question_group_size: usize,
    pub spacer_rows_between_groups: usize,
    pub spacer_cols_between_subjects: usize,
    pub question_row_weight: f64,
    pub spacer_row_weight: f64,
    pub option_col_weight: f64,
    pub spacer_col_weight: f64,
    /// Applied to the first and last column and row only.
    pub edge_shrink_factor: f64,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            subjects: 5,
            options: 4,
            questions: 20,
            question_group_size: 5,
            spacer_rows_between_groups: 2,
            spacer_cols_between_subjects: 2,
            question_row_weight: 1.9,
            spacer_row_weight: 1.2,
            option_col_weight: 0.65,
            spacer_col_weight: 0.63,
            edge_shrink_factor: 1.0,
        }
    }
}

impl GridSpec {
    pub fn question_groups(&self) -> usize {
        (self.questions + self.question_group_size - 1) / self.question_group_size
    }

    pub fn total_rows(&self) -> usize {
        self.questions + (self.question_groups() - 1) * self.spacer_rows_between_groups
    }

    pub fn total_cols(&self) -> usize {
        self.subjects * self.options + (self.subjects - 1) * self.spacer_cols_between_subjects
    }

    /// Option label for an option index: 0 → 'A', 1 → 'B', ...
    pub fn option_label(&self, option: usize) -> char {
        (b'A' + option as u8) as char
    }
}

/// Pixel-exact projection of a [`GridSpec`] onto a rectified image: integer
/// column widths and row heights whose sums match the image dimensions
/// exactly, plus the lookup tables between physical rows/columns and
/// logical questions/options.
#[derive(Debug, Clone, PartialEq)]
pub struct GridLayout {
    pub col_widths: Vec<u32>,
    pub row_heights: Vec<u32>,
    /// Cumulative column boundaries; `col_starts[c]..col_starts[c + 1]` is
    /// column `c`. Length `total_cols + 1`.
    pub col_starts: Vec<u32>,
    pub row_starts: Vec<u32>,
    /// Physical column → (subject, option); `None` on spacer columns.
    pub col_map: Vec<Option<(usize, usize)>>,
    /// Physical row → question index; `None` on spacer rows.
    pub row_map: Vec<Option<usize>>,
}

/// Computes the grid layout for a rectified image of the given dimensions.
pub fn compute_layout(spec: &GridSpec, width: u32, height: u32) -> GridLayout {
    let mut col_weights = Vec::with_capacity(spec.total_cols());
    let mut col_map = Vec::with_capacity(spec.total_cols());
    for subject in 0..spec.subjects {
        for option in 0..spec.options {
            col_weights.push(spec.option_col_weight);
            col_map.push(Some((subject, option)));
        }
        if subject != spec.subjects - 1 {
            for _ in 0..spec.spacer_cols_between_subjects {
                col_weights.push(spec.spacer_col_weight);
                col_map.push(None);
            }
        }
    }

    let mut row_weights = Vec::with_capacity(spec.total_rows());
    let mut row_map = Vec::with_capacity(spec.total_rows());
    let groups = spec.question_groups();
    let mut question = 0;
    for group in 0..groups {
        let in_group = spec.question_group_size.min(spec.questions - question);
        for _ in 0..in_group {
            row_weights.push(spec.question_row_weight);
            row_map.push(Some(question));
            question += 1;
        }
        if group != groups - 1 {
            for _ in 0..spec.spacer_rows_between_groups {
                row_weights.push(spec.spacer_row_weight);
                row_map.push(None);
            }
        }
    }

    shrink_edges(&mut col_weights, spec.edge_shrink_factor);
    shrink_edges(&mut row_weights, spec.edge_shrink_factor);

    let col_widths = weighted_integer_sizes(&col_weights, width);
    let row_heights = weighted_integer_sizes(&row_weights, height);

    GridLayout {
        col_starts: cumulative(&col_widths),
        row_starts: cumulative(&row_heights),
        col_widths,
        row_heights,
        col_map,
        row_map,
    }
}

fn shrink_edges(weights: &mut [f64], factor: f64) {
    if let Some(first) = weights.first_mut() {
        *first *= factor;
    }
    if let Some(last) = weights.last_mut() {
        *last *= factor;
    }
}

/// Scales weights so they sum to `target` pixels, then converts to
/// integers by flooring and handing the remaining unit pixels to the
/// entries with the largest fractional remainder. The result always sums
/// to exactly `target`.
fn weighted_integer_sizes(weights: &[f64], target: u32) -> Vec<u32> {
    if weights.is_empty() {
        return Vec::new();
    }
    let total: f64 = weights.iter().sum();
    let scaled = weights
        .iter()
        .map(|w| w * target as f64 / total)
        .collect::<Vec<f64>>();

    let mut sizes = scaled.iter().map(|s| s.floor() as u32).collect::<Vec<u32>>();
    let assigned: u32 = sizes.iter().sum();
    let remainder = target - assigned;

    let mut by_fraction = scaled
        .iter()
        .enumerate()
        .map(|(i, s)| (i, s - s.floor()))
        .collect::<Vec<(usize, f64)>>();
    by_fraction.sort_by(|a, b| b.1.partial_cmp(&a.1).expect("fractions are finite"));

    for &(i, _) in by_fraction.iter().take(remainder as usize) {
        sizes[i] += 1;
    }
    sizes
}

fn cumulative(sizes: &[u32]) -> Vec<u32> {
    let mut starts = Vec::with_capacity(sizes.len() + 1);
    let mut acc = 0;
    starts.push(0);
    for s in sizes {
        acc += s;
        starts.push(acc);
    }
    starts
}

impl GridLayout {
    /// Physical column index of a (subject, option) cell.
    pub fn column_of(&self, subject: usize, option: usize) -> Option<usize> {
        self.col_map
            .iter()
            .position(|&m| m == Some((subject, option)))
    }

    /// Vertical pixel bounds of a question's row.
    pub fn question_row_bounds(&self, question: usize) -> Option<(u32, u32)> {
        let row = self.row_map.iter().position(|&m| m == Some(question))?;
        Some((self.row_starts[row], self.row_starts[row + 1]))
    }

    /// Horizontal pixel bounds of a physical column.
    pub fn column_bounds(&self, col: usize) -> Option<(u32, u32)> {
        if col + 1 >= self.col_starts.len() {
            return None;
        }
        Some((self.col_starts[col], self.col_starts[col + 1]))
    }

    /// Maps a rectified pixel to its (subject, option, question) cell.
    /// Pixels on spacer rows/columns or outside the grid map to `None`.
    pub fn cell_at(&self, x: u32, y: u32) -> Option<(usize, usize, usize)> {
        let col = interval_index(&self.col_starts, x)?;
        let row = interval_index(&self.row_starts, y)?;
        let (subject, option) = self.col_map[col]?;
        let question = self.row_map[row]?;
        Some((subject, option, question))
    }
}

fn interval_index(starts: &[u32], value: u32) -> Option<usize> {
    if starts.len() < 2 || value >= *starts.last()? {
        return None;
    }
    match starts.binary_search(&value) {
        Ok(i) if i + 1 < starts.len() => Some(i),
        Ok(_) => None,
        Err(i) => Some(i - 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_spec_counts() {
        let spec = GridSpec::default();
        assert_eq!(spec.total_cols(), 28);
        assert_eq!(spec.total_rows(), 26);
        assert_eq!(spec.question_groups(), 4);
    }

    #[test]
    fn layout_sums_match_dimensions_exactly() {
        let spec = GridSpec::default();
        let layout = compute_layout(&spec, 1013, 787);
        assert_eq!(layout.col_widths.iter().sum::<u32>(), 1013);
        assert_eq!(layout.row_heights.iter().sum::<u32>(), 787);
        assert_eq!(*layout.col_starts.last().unwrap(), 1013);
        assert_eq!(*layout.row_starts.last().unwrap(), 787);
    }

    #[test]
    fn column_map_skips_spacers() {
        let spec = GridSpec::default();
        let layout = compute_layout(&spec, 1000, 1000);
        // first subject occupies columns 0..4, then two spacers
        assert_eq!(layout.col_map[0], Some((0, 0)));
        assert_eq!(layout.col_map[3], Some((0, 3)));
        assert_eq!(layout.col_map[4], None);
        assert_eq!(layout.col_map[5], None);
        assert_eq!(layout.col_map[6], Some((1, 0)));
        assert_eq!(layout.column_of(1, 0), Some(6));
        assert_eq!(
            layout.col_map.iter().filter(|m| m.is_some()).count(),
            spec.subjects * spec.options
        );
    }

    #[test]
    fn row_map_skips_spacer_rows_between_groups() {
        let spec = GridSpec::default();
        let layout = compute_layout(&spec, 1000, 1000);
        assert_eq!(layout.row_map[4], Some(4));
        assert_eq!(layout.row_map[5], None);
        assert_eq!(layout.row_map[6], None);
        assert_eq!(layout.row_map[7], Some(5));
    }

    #[test]
    fn cell_lookup_round_trips() {
        let spec = GridSpec::default();
        let layout = compute_layout(&spec, 900, 1200);
        for subject in 0..spec.subjects {
            for option in 0..spec.options {
                let col = layout.column_of(subject, option).expect("column exists");
                let (x1, x2) = layout.column_bounds(col).expect("bounds exist");
                let (y1, y2) = layout.question_row_bounds(7).expect("row exists");
                let cell = layout.cell_at((x1 + x2) / 2, (y1 + y2) / 2);
                assert_eq!(cell, Some((subject, option, 7)));
            }
        }
    }

    #[test]
    fn pixels_on_spacers_map_to_no_cell() {
        let spec = GridSpec::default();
        let layout = compute_layout(&spec, 900, 1200);
        let (x1, x2) = layout.column_bounds(4).expect("spacer column exists");
        assert_eq!(layout.cell_at((x1 + x2) / 2, 1), None);
        assert_eq!(layout.cell_at(0, 1200), None);
    }

    proptest! {
        #[test]
        fn widths_and_heights_always_sum_exactly(w in 28u32..4000, h in 26u32..4000) {
            let spec = GridSpec::default();
            let layout = compute_layout(&spec, w, h);
            prop_assert_eq!(layout.col_widths.iter().sum::<u32>(), w);
            prop_assert_eq!(layout.row_heights.iter().sum::<u32>(), h);
        }

        #[test]
        fn edge_shrink_preserves_exact_sums(w in 100u32..3000, shrink in 0.25f64..1.0) {
            let spec = GridSpec {
                edge_shrink_factor: shrink,
                ..GridSpec::default()
            };
            let layout = compute_layout(&spec, w, w);
            prop_assert_eq!(layout.col_widths.iter().sum::<u32>(), w);
            // shrunk edge columns never exceed their interior peers
            prop_assert!(layout.col_widths[0] <= layout.col_widths[1] + 1);
        }
    }
}
