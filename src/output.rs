//! Rendering of clustering results: log text, CSV-like and JSON

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::str::FromStr;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;

use crate::cluster::Cluster;
use crate::hierarchy::Hierarchy;
use crate::types::{Id, Share};

/// Output data format selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Text-like representation for logs
    Text,
    /// CSV-like representation for parsing
    Csv,
    /// JSON representation
    Json,
    /// JSON plus root clusters unwrapped to leaf nodes
    JsonExtended,
    /// Extended JSON plus inter-cluster links per level
    JsonDetailed,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "t" => Ok(Self::Text),
            "c" => Ok(Self::Csv),
            "j" => Ok(Self::Json),
            "je" => Ok(Self::JsonExtended),
            "jd" => Ok(Self::JsonDetailed),
            other => Err(format!("unexpected output format: {other}")),
        }
    }
}

/// Render the hierarchy to `out` in the requested format.
pub fn render(hier: &mut Hierarchy, format: OutputFormat, out: &mut dyn Write) -> Result<()> {
    match format {
        OutputFormat::Text => render_text(hier, out),
        OutputFormat::Csv => render_csv(hier, out),
        OutputFormat::Json => render_json(hier, out, false, false),
        OutputFormat::JsonExtended => render_json(hier, out, true, false),
        OutputFormat::JsonDetailed => render_json(hier, out, true, true),
    }
}

fn owners_ids(hier: &Hierarchy, cluster: &Cluster) -> Vec<Id> {
    cluster
        .owners
        .iter()
        .map(|&o| hier.clusters()[o as usize].id)
        .collect()
}

fn des_ids(hier: &Hierarchy, cluster: &Cluster) -> Vec<Id> {
    cluster.des.iter().map(|&d| hier.item_id(d)).collect()
}

fn join_ids(ids: &[Id]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_text(hier: &mut Hierarchy, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "\n -Clusters:")?;
    let mut levels: Vec<Vec<Id>> = Vec::new();
    hier.reset_traversing();
    loop {
        let mut ids: Vec<Id> = Vec::new();
        let more = hier.traverse_next_level(|c, _| ids.push(c.id));
        if !ids.is_empty() {
            levels.push(ids);
        }
        if !more {
            break;
        }
    }
    for (depth, level) in levels.iter().rev().enumerate() {
        writeln!(
            out,
            "----- Clusters level #{depth} ---------------------------------------------"
        )?;
        for &cid in level {
            let cluster = hier
                .clusters()
                .iter()
                .find(|c| c.id == cid)
                .expect("traversed cluster exists");
            let owners = owners_ids(hier, cluster);
            let owners_str = if owners.is_empty() {
                "-".to_string()
            } else {
                join_ids(&owners)
            };
            let kind = if cluster.has_leaf_descendants() {
                "(nds)"
            } else {
                "(cls)"
            };
            write!(
                out,
                "-Cluster #{}  ownersNum: {}\n\towners: {}\n\tdes {}: {}\n",
                cluster.id,
                cluster.owners.len(),
                owners_str,
                kind,
                join_ids(&des_ids(hier, cluster)),
            )?;
            if let Some(core) = cluster.core {
                writeln!(out, "\tcore: {}", hier.item_id(core))?;
            }
        }
    }
    writeln!(
        out,
        "-Nodes: {}, clusters (communities): {}, roots: {}, mod: {:.6}",
        hier.nodes().len(),
        hier.clusters().len(),
        hier.root().len(),
        hier.score().modularity,
    )?;
    Ok(())
}

fn render_csv(hier: &mut Hierarchy, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "# Clusters output format:")?;
    writeln!(
        out,
        "# <cluster_id>> [owners: <owner_id> ...;] des: <des_id> ...[; leafs: true][; core: <id>]"
    )?;
    for cluster in hier.clusters() {
        write!(out, "{}> ", cluster.id)?;
        let owners = owners_ids(hier, cluster);
        if !owners.is_empty() {
            write!(out, "owners: {}; ", join_ids(&owners))?;
        }
        write!(out, "des: {}", join_ids(&des_ids(hier, cluster)))?;
        if cluster.has_leaf_descendants() {
            write!(out, "; leafs: true")?;
        }
        if let Some(core) = cluster.core {
            write!(out, "; core: {}", hier.item_id(core))?;
        }
        writeln!(out)?;
    }
    writeln!(
        out,
        "# Nodes: {}, clusters: {}, roots: {}, mod: {:.6}",
        hier.nodes().len(),
        hier.clusters().len(),
        hier.root().len(),
        hier.score().modularity,
    )?;
    Ok(())
}

/// One cluster as it appears under the JSON `clusters` key.
#[derive(Serialize)]
struct ClusterJson {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    owners: Vec<Id>,
    des: Vec<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    leafs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    core: Option<Id>,
}

fn render_json(
    hier: &mut Hierarchy,
    out: &mut dyn Write,
    communities: bool,
    levels: bool,
) -> Result<()> {
    let root_ids: Vec<Id> = hier
        .root()
        .iter()
        .map(|&c| hier.clusters()[c as usize].id)
        .collect();

    let mut clusters: BTreeMap<String, ClusterJson> = BTreeMap::new();
    for cluster in hier.clusters() {
        clusters.insert(
            cluster.id.to_string(),
            ClusterJson {
                owners: owners_ids(hier, cluster),
                des: des_ids(hier, cluster),
                leafs: cluster.has_leaf_descendants().then_some(true),
                core: cluster.core.map(|c| hier.item_id(c)),
            },
        );
    }

    let mut doc = json!({
        "root": root_ids,
        "clusters": clusters,
        "nodes": hier.nodes().len(),
        "mod": hier.score().modularity,
    });

    if communities && !hier.root().is_empty() {
        let mut map: BTreeMap<String, BTreeMap<String, Share>> = BTreeMap::new();
        for &ci in hier.root() {
            let cid = hier.clusters()[ci as usize].id;
            let mut shares: HashMap<Id, Share> = HashMap::new();
            hier.unwrap(ci, &mut shares);
            let entry: BTreeMap<String, Share> = shares
                .into_iter()
                .map(|(id, share)| (id.to_string(), share))
                .collect();
            map.insert(cid.to_string(), entry);
        }
        doc["communities"] = json!(map);
    }

    if levels {
        let mut level_docs: Vec<BTreeMap<String, BTreeMap<String, f64>>> = Vec::new();
        hier.reset_traversing();
        let mut more = true;
        while more {
            let mut level: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
            let mut ids: Vec<Id> = Vec::new();
            more = hier.traverse_next_level(|c, _| ids.push(c.id));
            if ids.is_empty() {
                break;
            }
            for cid in ids {
                let cluster = hier
                    .clusters()
                    .iter()
                    .find(|c| c.id == cid)
                    .expect("traversed cluster exists");
                let mut links: BTreeMap<String, f64> = BTreeMap::new();
                // Self-weight shows up as a link of the cluster to itself.
                if cluster.self_weight != 0.0 {
                    links.insert(cluster.id.to_string(), cluster.self_weight);
                }
                for link in &cluster.links {
                    links.insert(hier.item_id(link.dest).to_string(), link.weight);
                }
                level.insert(cluster.id.to_string(), links);
            }
            level_docs.push(level);
        }
        doc["levels"] = json!(level_docs);
    }

    write!(out, "{doc}")?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::cluster;
    use crate::config::ClusterOptions;
    use crate::graph::{Graph, InputLink};

    fn clustered_triangle() -> Hierarchy {
        let mut g = Graph::new(true, 3);
        for &(s, d) in &[(0, 1), (0, 2), (1, 2)] {
            g.add_node_and_links(s, &[InputLink::new(d, 1.0)], false).unwrap();
        }
        cluster(g.finalize().unwrap(), &ClusterOptions::default()).unwrap()
    }

    fn rendered(format: OutputFormat) -> String {
        let mut hier = clustered_triangle();
        let mut buf: Vec<u8> = Vec::new();
        render(&mut hier, format, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn format_codes_parse() {
        assert_eq!("t".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("jd".parse::<OutputFormat>().unwrap(), OutputFormat::JsonDetailed);
        assert!("x".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn text_output_carries_the_summary_line() {
        let text = rendered(OutputFormat::Text);
        assert!(text.contains("-Nodes: 3, clusters (communities): 1, roots: 1"));
        assert!(text.contains("leafs") || text.contains("(nds)"));
    }

    #[test]
    fn csv_output_lists_descendants() {
        let text = rendered(OutputFormat::Csv);
        assert!(text.contains("des: 0 1 2"));
        assert!(text.contains("leafs: true"));
    }

    #[test]
    fn json_output_has_the_expected_shape() {
        let text = rendered(OutputFormat::JsonExtended);
        let doc: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(doc["nodes"], 3);
        assert_eq!(doc["root"].as_array().unwrap().len(), 1);
        let communities = doc["communities"].as_object().unwrap();
        assert_eq!(communities.len(), 1);
        let shares = communities.values().next().unwrap().as_object().unwrap();
        assert_eq!(shares.len(), 3);
        for share in shares.values() {
            assert_eq!(share.as_f64().unwrap(), 1.0);
        }
    }

    #[test]
    fn detailed_json_lists_levels() {
        let text = rendered(OutputFormat::JsonDetailed);
        let doc: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        let levels = doc["levels"].as_array().unwrap();
        assert_eq!(levels.len(), 1);
        let level = levels[0].as_object().unwrap();
        assert_eq!(level.len(), 1);
        // The triangle's root holds its whole mass as a self-link.
        let links = level.values().next().unwrap().as_object().unwrap();
        assert_eq!(links.len(), 1);
    }
}
