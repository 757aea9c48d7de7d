//! Text renderings of the stage graph.

use super::StageGraph;

impl StageGraph {
    /// Renders the graph in GraphViz DOT format.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut lines = vec![
            "digraph pipeline {".to_string(),
            "  rankdir=LR;".to_string(),
            "  node [shape=box, style=rounded];".to_string(),
            String::new(),
        ];

        let names = self.sorted_names();
        for name in &names {
            lines.push(format!("  {};", dot_quote(name)));
        }
        lines.push(String::new());

        for name in &names {
            for dep in self.dependencies(name) {
                lines.push(format!("  {} -> {};", dot_quote(&dep), dot_quote(name)));
            }
        }

        lines.push("}".to_string());
        lines.join("\n")
    }

    /// Renders the graph as a Mermaid flowchart.
    #[must_use]
    pub fn to_mermaid(&self) -> String {
        let mut lines = vec!["graph LR".to_string()];

        for name in self.sorted_names() {
            let deps = self.dependencies(name);
            if deps.is_empty() {
                lines.push(format!("  {name}"));
            }
            for dep in deps {
                lines.push(format!("  {dep} --> {name}"));
            }
        }

        lines.join("\n")
    }

    fn sorted_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stage_names().iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Wraps a name in a DOT quoted string.
fn dot_quote(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for c in name.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
