//! Folder/file structure rendering.
//!
//! The drawing graph is rebuilt from the fetched rows on its own and never consults the
//! Bayesian model. Layout is a Fruchterman-Reingold spring simulation with initial
//! positions seeded from a SHA-256 digest of each node name, so a given row set always
//! renders the same figure.
//!
//! Output formats:
//! - SVG (self-contained figure)
//! - Graphviz DOT (for external layout tooling)

use crate::{error::LineageError, record::FileRecord};
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::BTreeMap,
    fmt::Write as _,
    path::{Path, PathBuf},
};

pub const FIGURE_TITLE: &str = "Folder and File Structure Visualization";

const NODE_FILL: &str = "lightblue";
const EDGE_STROKE: &str = "gray";
const NODE_RADIUS: f64 = 28.0;
const FONT_SIZE: u32 = 10;
const MARGIN: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VizFormat {
    #[default]
    Svg,
    Dot,
}

impl VizFormat {
    pub fn parse(s: &str) -> Result<Self, LineageError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "svg" => Ok(Self::Svg),
            "dot" | "gv" => Ok(Self::Dot),
            other => Err(LineageError::Config(format!(
                "unknown viz format `{other}` (expected svg|dot)"
            ))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            VizFormat::Svg => "svg",
            VizFormat::Dot => "dot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VizOptions {
    pub enabled: bool,
    pub output: PathBuf,
    pub format: VizFormat,
    pub width: u32,
    pub height: u32,
    pub iterations: usize,
}

impl Default for VizOptions {
    fn default() -> Self {
        VizOptions {
            enabled: true,
            output: PathBuf::from("file_structure.svg"),
            format: VizFormat::Svg,
            width: 1200,
            height: 800,
            iterations: 50,
        }
    }
}

/// Plain directed graph of the hierarchy, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct VizGraph<'a> {
    graph: DiGraphMap<&'a str, ()>,
}

impl<'a> VizGraph<'a> {
    pub fn from_records(records: &'a [FileRecord]) -> Self {
        let mut graph = DiGraphMap::new();
        for record in records {
            graph.add_node(record.file_path.as_str());
            if let Some(parent) = record.parent() {
                graph.add_edge(parent, record.file_path.as_str(), ());
            }
        }
        VizGraph { graph }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.graph.nodes()
    }

    pub fn edges(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.graph.all_edges().map(|(a, b, _)| (a, b))
    }
}

/// Unit-square coordinates per node.
pub type Layout<'a> = BTreeMap<&'a str, (f64, f64)>;

fn seed_position(name: &str) -> (f64, f64) {
    let digest = Sha256::digest(name.as_bytes());
    let x = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    let y = u32::from_be_bytes([digest[4], digest[5], digest[6], digest[7]]);
    (x as f64 / u32::MAX as f64, y as f64 / u32::MAX as f64)
}

/// Fruchterman-Reingold layout, edges treated as undirected springs. The result is
/// rescaled to fill `[0, 1]` on both axes.
pub fn spring_layout<'a>(graph: &VizGraph<'a>, iterations: usize) -> Layout<'a> {
    let nodes: Vec<&'a str> = graph.nodes().collect();
    let n = nodes.len();
    let mut pos: Vec<(f64, f64)> = nodes.iter().map(|name| seed_position(name)).collect();
    if n == 1 {
        return BTreeMap::from([(nodes[0], (0.5, 0.5))]);
    }

    let index: BTreeMap<&str, usize> = nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();
    let springs: Vec<(usize, usize)> = graph
        .edges()
        .filter_map(|(a, b)| Some((*index.get(a)?, *index.get(b)?)))
        .collect();

    let k = (1.0 / n.max(1) as f64).sqrt();
    let mut temperature = 0.1;
    let cooling = temperature / (iterations as f64 + 1.0);
    for _ in 0..iterations {
        let mut disp = vec![(0.0f64, 0.0f64); n];
        for i in 0..n {
            for j in (i + 1)..n {
                let dx = pos[i].0 - pos[j].0;
                let dy = pos[i].1 - pos[j].1;
                let dist = (dx * dx + dy * dy).sqrt().max(0.01);
                let force = k * k / dist;
                disp[i].0 += dx / dist * force;
                disp[i].1 += dy / dist * force;
                disp[j].0 -= dx / dist * force;
                disp[j].1 -= dy / dist * force;
            }
        }
        for (a, b) in springs.iter().copied() {
            if a == b {
                continue;
            }
            let dx = pos[a].0 - pos[b].0;
            let dy = pos[a].1 - pos[b].1;
            let dist = (dx * dx + dy * dy).sqrt().max(0.01);
            let force = dist * dist / k;
            disp[a].0 -= dx / dist * force;
            disp[a].1 -= dy / dist * force;
            disp[b].0 += dx / dist * force;
            disp[b].1 += dy / dist * force;
        }
        for (p, d) in pos.iter_mut().zip(disp.iter()) {
            let len = (d.0 * d.0 + d.1 * d.1).sqrt().max(0.01);
            let step = len.min(temperature);
            p.0 += d.0 / len * step;
            p.1 += d.1 / len * step;
        }
        temperature -= cooling;
    }

    rescale(&mut pos);
    nodes.into_iter().zip(pos).collect()
}

fn rescale(pos: &mut [(f64, f64)]) {
    let (mut min_x, mut max_x) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_y, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
    for (x, y) in pos.iter() {
        min_x = min_x.min(*x);
        max_x = max_x.max(*x);
        min_y = min_y.min(*y);
        max_y = max_y.max(*y);
    }
    let span_x = (max_x - min_x).max(f64::EPSILON);
    let span_y = (max_y - min_y).max(f64::EPSILON);
    for p in pos.iter_mut() {
        p.0 = (p.0 - min_x) / span_x;
        p.1 = (p.1 - min_y) / span_y;
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn render_svg(
    graph: &VizGraph<'_>,
    layout: &Layout<'_>,
    width: u32,
    height: u32,
) -> Result<String, LineageError> {
    let w = width as f64;
    let h = height as f64;
    let top = MARGIN + 20.0;
    let to_canvas = |(x, y): (f64, f64)| {
        (
            MARGIN + x * (w - 2.0 * MARGIN),
            top + y * (h - top - MARGIN),
        )
    };

    let mut out = String::new();
    writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#
    )?;
    writeln!(out, "  <defs>")?;
    writeln!(
        out,
        r#"    <marker id="arrow" viewBox="0 0 10 10" refX="10" refY="5" markerWidth="8" markerHeight="8" orient="auto-start-reverse"><path d="M 0 0 L 10 5 L 0 10 z" fill="{EDGE_STROKE}"/></marker>"#
    )?;
    writeln!(out, "  </defs>")?;
    writeln!(out, r#"  <rect width="100%" height="100%" fill="white"/>"#)?;
    writeln!(
        out,
        r#"  <text x="{}" y="{}" text-anchor="middle" font-family="sans-serif" font-size="16">{}</text>"#,
        w / 2.0,
        MARGIN / 2.0 + 8.0,
        FIGURE_TITLE
    )?;

    writeln!(out, r#"  <g class="edges" stroke="{EDGE_STROKE}" stroke-width="1.5">"#)?;
    for (source, target) in graph.edges() {
        let (Some(a), Some(b)) = (layout.get(source), layout.get(target)) else {
            continue;
        };
        let (x1, y1) = to_canvas(*a);
        let (x2, y2) = to_canvas(*b);
        let dx = x2 - x1;
        let dy = y2 - y1;
        let dist = (dx * dx + dy * dy).sqrt().max(f64::EPSILON);
        // Stop the line at the rim of the target circle so the arrowhead stays visible.
        let (ex, ey) = (x2 - dx / dist * NODE_RADIUS, y2 - dy / dist * NODE_RADIUS);
        writeln!(
            out,
            r#"    <line x1="{x1:.1}" y1="{y1:.1}" x2="{ex:.1}" y2="{ey:.1}" marker-end="url(#arrow)"/>"#
        )?;
    }
    writeln!(out, "  </g>")?;

    writeln!(out, r#"  <g class="nodes">"#)?;
    for name in graph.nodes() {
        let Some(p) = layout.get(name) else {
            continue;
        };
        let (x, y) = to_canvas(*p);
        let label = xml_escape(name);
        writeln!(
            out,
            r#"    <circle cx="{x:.1}" cy="{y:.1}" r="{NODE_RADIUS}" fill="{NODE_FILL}"><title>{label}</title></circle>"#
        )?;
        writeln!(
            out,
            r#"    <text x="{x:.1}" y="{:.1}" text-anchor="middle" font-family="sans-serif" font-size="{FONT_SIZE}" font-weight="bold">{label}</text>"#,
            y + FONT_SIZE as f64 / 3.0
        )?;
    }
    writeln!(out, "  </g>")?;
    writeln!(out, "</svg>")?;
    Ok(out)
}

pub fn render_dot(graph: &VizGraph<'_>) -> String {
    fn dot_escape(s: &str) -> String {
        s.replace('\\', "\\\\").replace('"', "\\\"")
    }

    let mut out = String::new();
    out.push_str("digraph file_structure {\n");
    out.push_str(&format!("  label=\"{FIGURE_TITLE}\";\n"));
    out.push_str("  labelloc=t;\n");
    out.push_str("  layout=fdp;\n");
    out.push_str(&format!(
        "  node [shape=circle, style=filled, fillcolor={NODE_FILL}, fontsize={FONT_SIZE}, fontname=\"Helvetica-Bold\"];\n"
    ));
    out.push_str(&format!("  edge [color={EDGE_STROKE}];\n\n"));
    for name in graph.nodes() {
        out.push_str(&format!("  \"{}\";\n", dot_escape(name)));
    }
    for (source, target) in graph.edges() {
        out.push_str(&format!(
            "  \"{}\" -> \"{}\";\n",
            dot_escape(source),
            dot_escape(target)
        ));
    }
    out.push_str("}\n");
    out
}

/// Lays out and renders the rows in `options.format`, writing the figure to
/// `options.output`. Returns the path written.
#[tracing::instrument(skip(records, options), fields(rows = records.len()))]
pub fn visualize_structure(
    records: &[FileRecord],
    options: &VizOptions,
) -> Result<PathBuf, LineageError> {
    let graph = VizGraph::from_records(records);
    let figure = match options.format {
        VizFormat::Svg => {
            let layout = spring_layout(&graph, options.iterations);
            render_svg(&graph, &layout, options.width, options.height)?
        }
        VizFormat::Dot => render_dot(&graph),
    };
    write_figure(&options.output, &figure)?;
    tracing::info!(
        "Rendered {} nodes / {} edges to {:?}",
        graph.node_count(),
        graph.edge_count(),
        options.output
    );
    Ok(options.output.clone())
}

fn write_figure(path: &Path, figure: &str) -> Result<(), LineageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            LineageError::Render(format!("could not create directory {parent:?}: {e}"))
        })?;
    }
    std::fs::write(path, figure)
        .map_err(|e| LineageError::Render(format!("could not write {path:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<FileRecord> {
        vec![
            FileRecord::new("uploads", 1, None),
            FileRecord::new("uploads/a.txt", 2, Some("uploads")),
            FileRecord::new("uploads/b & c.txt", 1, Some("uploads")),
            FileRecord::new("uploads/a.txt", 3, Some("uploads")),
        ]
    }

    #[test]
    fn test_graph_dedups_rows() {
        let rows = rows();
        let graph = VizGraph::from_records(&rows);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_layout_is_deterministic_and_bounded() {
        let rows = rows();
        let graph = VizGraph::from_records(&rows);
        let first = spring_layout(&graph, 50);
        let second = spring_layout(&graph, 50);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        for (x, y) in first.values() {
            assert!((0.0..=1.0).contains(x) && (0.0..=1.0).contains(y));
        }
    }

    #[test]
    fn test_single_node_is_centered() {
        let rows = vec![FileRecord::new("solo", 0, None)];
        let graph = VizGraph::from_records(&rows);
        let layout = spring_layout(&graph, 50);
        assert_eq!(layout["solo"], (0.5, 0.5));
    }

    #[test]
    fn test_svg_contains_every_node_and_edge() {
        let rows = rows();
        let graph = VizGraph::from_records(&rows);
        let layout = spring_layout(&graph, 10);
        let svg = render_svg(&graph, &layout, 640, 480).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(FIGURE_TITLE));
        assert_eq!(svg.matches("<circle").count(), 3);
        assert_eq!(svg.matches("<line").count(), 2);
        assert!(svg.contains("uploads/b &amp; c.txt"));
    }

    #[test]
    fn test_dot_output() {
        let rows = rows();
        let graph = VizGraph::from_records(&rows);
        let dot = render_dot(&graph);
        assert!(dot.starts_with("digraph file_structure {"));
        assert!(dot.contains("\"uploads\" -> \"uploads/a.txt\";"));
        assert_eq!(dot.matches(" -> ").count(), 2);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(VizFormat::parse("SVG").unwrap(), VizFormat::Svg);
        assert_eq!(VizFormat::parse("gv").unwrap(), VizFormat::Dot);
        assert!(VizFormat::parse("png").is_err());
    }

    #[test]
    fn test_visualize_writes_figure() {
        let dir = tempfile::TempDir::new().unwrap();
        let options = VizOptions {
            output: dir.path().join("out").join("tree.dot"),
            format: VizFormat::Dot,
            ..Default::default()
        };
        let written = visualize_structure(&rows(), &options).unwrap();
        let text = std::fs::read_to_string(written).unwrap();
        assert!(text.contains("digraph"));
    }

    #[test]
    fn test_unwritable_directory_is_render_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let options = VizOptions {
            output: blocker.join("nested").join("tree.svg"),
            ..Default::default()
        };
        let err = visualize_structure(&rows(), &options).unwrap_err();
        assert!(matches!(err, LineageError::Render(_)), "{err:?}");
        assert_eq!(err.exit_code(), 74);
    }
}
