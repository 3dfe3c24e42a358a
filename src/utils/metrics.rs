//! File statistics and the value encodings used by the serializer.

/// Line count and indentation statistics of one source text
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FileStats {
    pub line_count: usize,
    /// Mean leading whitespace (in columns) over non-blank lines
    pub mean_indent: f64,
}

impl FileStats {
    /// A tab counts for `tab_width` columns.
    pub fn measure(text: &str, tab_width: usize) -> Self {
        let mut line_count = 0;
        let mut non_blank = 0usize;
        let mut indent_total = 0usize;

        for line in text.lines() {
            line_count += 1;
            if line.trim().is_empty() {
                continue;
            }
            non_blank += 1;
            indent_total += line
                .chars()
                .take_while(|c| c.is_whitespace())
                .map(|c| if c == '\t' { tab_width } else { 1 })
                .sum::<usize>();
        }

        let mean_indent = if non_blank == 0 {
            0.0
        } else {
            indent_total as f64 / non_blank as f64
        };
        Self {
            line_count,
            mean_indent,
        }
    }
}

/// Maps values linearly onto [0, 1].
///
/// With more than two samples the single smallest and largest samples are
/// treated as outliers and excluded from the fitted range. With fewer the range
/// is widened to include 0, so a lone sample scales to 1. Values outside the
/// range are clamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinMaxScaler {
    min: f64,
    max: f64,
}

impl MinMaxScaler {
    pub fn fit(values: &[f64]) -> Self {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        sorted.sort_by(f64::total_cmp);

        if sorted.len() > 2 {
            let trimmed = &sorted[1..sorted.len() - 1];
            return Self {
                min: trimmed[0],
                max: trimmed[trimmed.len() - 1],
            };
        }
        let (min, max) = sorted
            .iter()
            .fold((0.0_f64, 0.0_f64), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        Self { min, max }
    }

    pub fn scale(&self, value: f64) -> f64 {
        let range = self.max - self.min;
        if range <= 0.0 {
            return 0.0;
        }
        ((value - self.min) / range).clamp(0.0, 1.0)
    }
}

// Viridis sampled at 0, .25, .5, .75, 1
const VIRIDIS: [(f64, f64, f64); 5] = [
    (68.0, 1.0, 84.0),
    (59.0, 82.0, 139.0),
    (33.0, 145.0, 140.0),
    (94.0, 201.0, 98.0),
    (253.0, 231.0, 37.0),
];

/// `#rrggbb` colour for `t` in [0, 1] on the viridis ramp
pub fn viridis_hex(t: f64) -> String {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let scaled = t * (VIRIDIS.len() - 1) as f64;
    let lower = (scaled.floor() as usize).min(VIRIDIS.len() - 2);
    let frac = scaled - lower as f64;

    let (r0, g0, b0) = VIRIDIS[lower];
    let (r1, g1, b1) = VIRIDIS[lower + 1];
    let lerp = |a: f64, b: f64| (a + (b - a) * frac).round() as u8;
    format!("#{:02x}{:02x}{:02x}", lerp(r0, r1), lerp(g0, g1), lerp(b0, b1))
}
