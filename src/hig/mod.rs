//! Parser for the line-oriented `.hig` adjacency file format
//!
//! `#` starts a comment; `/` starts a section header. Sections in order:
//! `/graph [weighted:0|1]`, `/nodes [count [startId]]`, then `/edges`
//! (undirected) and/or `/arcs` (directed) adjacency lines of the form
//! `src> dst[:w] dst[:w] ...`.

use thiserror::Error;

use crate::error::GraphError;
use crate::graph::{Graph, InputLink};
use crate::types::Id;

/// Width of the context window quoted around a syntax error.
const ERR_CONTEXT: usize = 8;

/// An error in the input file, fatal for the current run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("line {line}: unknown section is used: /{name}")]
    UnknownSection { line: usize, name: String },

    #[error("line {line}: invalid (empty) section header")]
    EmptySectionHeader { line: usize },

    #[error("line {line}: unexpected section /{name}: {expected}")]
    MisplacedSection {
        line: usize,
        name: &'static str,
        expected: &'static str,
    },

    #[error("line {line}: invalid value format at offset {offset}, context: {context}")]
    Syntax {
        line: usize,
        offset: usize,
        context: String,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    None,
    Graph,
    Nodes,
    Edges,
    Arcs,
}

/// Parse the text of a `.hig` file into a graph builder.
///
/// The returned graph is not finalized; the caller decides when to freeze
/// it. `shuffle` enables random reordering during construction, optionally
/// from a fixed seed.
pub fn parse_hig(text: &str, shuffle: bool, seed: Option<u64>) -> Result<Graph, ParseError> {
    let mut parser = Parser {
        weighted: true,
        nodes_num: 0,
        start_id: None,
        shuffle,
        seed,
        graph: None,
        section: Section::None,
    };

    for (lineno, raw) in text.lines().enumerate() {
        parser.parse_line(lineno + 1, raw)?;
    }

    parser.into_graph()
}

struct Parser {
    weighted: bool,
    nodes_num: usize,
    start_id: Option<Id>,
    shuffle: bool,
    seed: Option<u64>,
    graph: Option<Graph>,
    section: Section,
}

impl Parser {
    fn parse_line(&mut self, lineno: usize, raw: &str) -> Result<(), ParseError> {
        let line = raw.trim_start();
        if line.is_empty() || line.starts_with('#') {
            return Ok(());
        }
        if let Some(header) = line.strip_prefix('/') {
            return self.parse_section(lineno, header);
        }
        match self.section {
            Section::Edges => self.parse_links(lineno, raw, false),
            Section::Arcs => self.parse_links(lineno, raw, true),
            // Stray payload outside the adjacency sections is skipped.
            _ => Ok(()),
        }
    }

    fn parse_section(&mut self, lineno: usize, header: &str) -> Result<(), ParseError> {
        // Cut the tail comment before reading attributes.
        let header = header.split('#').next().unwrap_or("");
        let mut tokens = header.split_whitespace();
        let name = tokens.next().unwrap_or("").to_lowercase();
        if name.is_empty() {
            return Err(ParseError::EmptySectionHeader { line: lineno });
        }
        match name.as_str() {
            "graph" => {
                if self.section != Section::None {
                    return Err(ParseError::MisplacedSection {
                        line: lineno,
                        name: "graph",
                        expected: "graph section must be the first one",
                    });
                }
                self.section = Section::Graph;
                let mut tokens = tokens.peekable();
                while let Some(attr) = tokens.next() {
                    if let Some(value) = attr.strip_prefix("weighted:") {
                        // A space is allowed after the colon.
                        let value = if value.is_empty() {
                            tokens.peek().copied().unwrap_or("")
                        } else {
                            value
                        };
                        match value.parse::<i32>() {
                            Ok(v) => self.weighted = v != 0,
                            Err(_) => {
                                return Err(ParseError::Syntax {
                                    line: lineno,
                                    offset: 0,
                                    context: attr.to_string(),
                                })
                            }
                        }
                    }
                }
                Ok(())
            }
            "nodes" => {
                if self.section != Section::None && self.section != Section::Graph {
                    return Err(ParseError::MisplacedSection {
                        line: lineno,
                        name: "nodes",
                        expected: "nodes section must be first or follow the graph section",
                    });
                }
                self.section = Section::Nodes;
                if let Some(count) = tokens.next() {
                    self.nodes_num = count.parse().map_err(|_| ParseError::Syntax {
                        line: lineno,
                        offset: 0,
                        context: count.to_string(),
                    })?;
                    if let Some(start) = tokens.next() {
                        self.start_id = Some(start.parse().map_err(|_| ParseError::Syntax {
                            line: lineno,
                            offset: 0,
                            context: start.to_string(),
                        })?);
                    }
                }
                Ok(())
            }
            "edges" => {
                self.section = Section::Edges;
                Ok(())
            }
            "arcs" => {
                self.section = Section::Arcs;
                Ok(())
            }
            _ => Err(ParseError::UnknownSection {
                line: lineno,
                name,
            }),
        }
    }

    fn ensure_graph(&mut self) -> Result<&mut Graph, ParseError> {
        if self.graph.is_none() {
            let mut graph = if self.shuffle {
                Graph::with_shuffle(self.weighted, self.nodes_num, self.seed)
            } else {
                Graph::new(self.weighted, self.nodes_num)
            };
            if let Some(start) = self.start_id {
                graph.add_node_range(start, start + self.nodes_num as Id)?;
            }
            self.graph = Some(graph);
        }
        Ok(self.graph.as_mut().expect("graph was just created"))
    }

    fn parse_links(&mut self, lineno: usize, line: &str, directed: bool) -> Result<(), ParseError> {
        let Some(gt) = line.find('>') else {
            return Err(syntax_error(lineno, line, line.len()));
        };
        let src: Id = line[..gt]
            .trim()
            .parse()
            .map_err(|_| syntax_error(lineno, line, 0))?;

        let mut links: Vec<InputLink> = Vec::new();
        let bytes = line.as_bytes();
        let mut pos = gt + 1;
        while pos < line.len() {
            while pos < line.len() && (bytes[pos] == b' ' || bytes[pos] == b'\t') {
                pos += 1;
            }
            if pos >= line.len() {
                break;
            }
            let start = pos;
            while pos < line.len() && bytes[pos] != b' ' && bytes[pos] != b'\t' {
                pos += 1;
            }
            let token = &line[start..pos];
            // A trailing comment ends the link list.
            if token.starts_with('#') {
                break;
            }
            links.push(self.parse_link_token(lineno, line, start, token)?);
        }

        if !links.is_empty() {
            let strict = self.start_id.is_some();
            let graph = self.ensure_graph()?;
            if strict {
                graph.add_node_links(src, &links, directed)?;
            } else {
                graph.add_node_and_links(src, &links, directed)?;
            }
        }
        Ok(())
    }

    fn parse_link_token(
        &self,
        lineno: usize,
        line: &str,
        tok_off: usize,
        token: &str,
    ) -> Result<InputLink, ParseError> {
        let (dst_str, weight_str) = match token.split_once(':') {
            Some((d, w)) => (d, Some(w)),
            None => (token, None),
        };
        let dst: Id = dst_str
            .parse()
            .map_err(|_| syntax_error(lineno, line, tok_off))?;
        match weight_str {
            Some(w) if self.weighted => {
                let weight: f32 = w.parse().map_err(|_| {
                    syntax_error(lineno, line, tok_off + dst_str.len() + 1)
                })?;
                Ok(InputLink::new(dst, weight))
            }
            // The unweighted path carries no weights; a stray suffix is
            // tolerated the way the format always tolerated it.
            _ => Ok(InputLink::unweighted(dst)),
        }
    }

    fn into_graph(mut self) -> Result<Graph, ParseError> {
        match self.graph.take() {
            Some(graph) => Ok(graph),
            None => {
                // No adjacency lines: an edgeless graph of declared nodes.
                let mut graph = if self.shuffle {
                    Graph::with_shuffle(self.weighted, self.nodes_num, self.seed)
                } else {
                    Graph::new(self.weighted, self.nodes_num)
                };
                if let Some(start) = self.start_id {
                    graph.add_node_range(start, start + self.nodes_num as Id)?;
                }
                Ok(graph)
            }
        }
    }
}

/// A syntax error quoting the byte offset and a bounded context window.
fn syntax_error(lineno: usize, line: &str, offset: usize) -> ParseError {
    let beg = offset.saturating_sub(ERR_CONTEXT);
    let end = (offset + ERR_CONTEXT + 1).min(line.len());
    let context = line
        .get(beg..end)
        .unwrap_or_else(|| line.get(beg..).unwrap_or(""))
        .to_string();
    ParseError::Syntax {
        line: lineno,
        offset,
        context,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_weighted_edges() {
        let text = "# toy graph\n/graph weighted:1\n/edges\n0> 1:2 2\n1> 2:4\n";
        let mut graph = parse_hig(text, false, None).unwrap();
        assert!(!graph.directed());
        let nodes = graph.finalize().unwrap();
        assert_eq!(nodes.len(), 3);
        // Edge 0-1 of weight 2 halves to two arcs of 1.
        let n0 = nodes.iter().find(|n| n.id == 0).unwrap();
        assert_eq!(n0.links.len(), 2);
        let total: f32 = nodes.iter().flat_map(|n| &n.links).map(|l| l.weight).sum();
        // Edges 2 + 1 + 4 give arc mass equal to the edge mass.
        assert!((total - 7.0).abs() < 1e-6);
    }

    #[test]
    fn parses_unweighted_graph_header() {
        let text = "/graph weighted:0\n/edges\n0> 1 2\n";
        let mut graph = parse_hig(text, false, None).unwrap();
        let nodes = graph.finalize().unwrap();
        // Unweighted arcs stay at 1 in both directions.
        let total: f32 = nodes.iter().flat_map(|n| &n.links).map(|l| l.weight).sum();
        assert_eq!(total, 4.0);
    }

    #[test]
    fn arcs_section_is_directed() {
        let text = "/graph weighted:1\n/arcs\n0> 1:3\n";
        let mut graph = parse_hig(text, false, None).unwrap();
        assert!(graph.directed());
        let nodes = graph.finalize().unwrap();
        let n0 = nodes.iter().find(|n| n.id == 0).unwrap();
        let n1 = nodes.iter().find(|n| n.id == 1).unwrap();
        assert_eq!(n0.links.len(), 1);
        assert_eq!(n0.links[0].weight, 3.0);
        assert!(n1.links.is_empty());
    }

    #[test]
    fn self_reference_feeds_self_weight() {
        let text = "/graph weighted:1\n/edges\n0> 0:6 1:1\n";
        let mut graph = parse_hig(text, false, None).unwrap();
        let nodes = graph.finalize().unwrap();
        let n0 = nodes.iter().find(|n| n.id == 0).unwrap();
        assert_eq!(n0.self_weight, 6.0);
        assert_eq!(n0.links.len(), 1);
    }

    #[test]
    fn nodes_section_preallocates_contiguous_ids() {
        let text = "/graph weighted:1\n/nodes 3 10\n/edges\n10> 11:1\n";
        let mut graph = parse_hig(text, false, None).unwrap();
        let nodes = graph.finalize().unwrap();
        assert_eq!(nodes.len(), 3);
        assert!(nodes.iter().any(|n| n.id == 12));
    }

    #[test]
    fn link_to_undeclared_node_fails_with_start_id() {
        let text = "/graph weighted:1\n/nodes 2 0\n/edges\n0> 5:1\n";
        let err = parse_hig(text, false, None).unwrap_err();
        assert_eq!(err, ParseError::Graph(GraphError::UnknownNode { id: 5 }));
    }

    #[test]
    fn unknown_section_is_rejected() {
        let err = parse_hig("/graph\n/foo\n", false, None).unwrap_err();
        assert!(matches!(err, ParseError::UnknownSection { line: 2, ref name } if name == "foo"));
    }

    #[test]
    fn graph_section_must_be_first() {
        let err = parse_hig("/edges\n/graph\n", false, None).unwrap_err();
        assert!(matches!(
            err,
            ParseError::MisplacedSection { line: 2, name: "graph", .. }
        ));
    }

    #[test]
    fn syntax_error_reports_offset_and_context() {
        let text = "/graph weighted:1\n/edges\n0> 1:x 2\n";
        let err = parse_hig(text, false, None).unwrap_err();
        match err {
            ParseError::Syntax { line, offset, context } => {
                assert_eq!(line, 3);
                assert_eq!(offset, 5);
                assert!(context.contains("1:x"));
            }
            other => panic!("expected a syntax error, got {other:?}"),
        }
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let text = "\n# header\n/graph weighted:1  # trailing\n/edges\n# mid\n0> 1\n\n";
        let mut graph = parse_hig(text, false, None).unwrap();
        let nodes = graph.finalize().unwrap();
        assert_eq!(nodes.len(), 2);
    }
}
