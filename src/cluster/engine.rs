//! The per-level clustering pass and the overall agglomeration loop

use std::collections::HashMap;

use crate::cluster::modularity::{
    gain_asymmetric, gain_symmetric, item_modularity, network_weight, saturating,
};
use crate::cluster::{AccLink, Cluster, Clusterable, Context, ItemRef};
use crate::config::ClusterOptions;
use crate::error::GraphError;
use crate::graph::{self, Nodes};
use crate::hierarchy::{Hierarchy, Score};
use crate::types::{acc_eq, acc_less, acc_positive, acc_saturated, AccWeight, Id};

/// Factor by which an item must outweigh the weighted mean of its mutual
/// candidates' weights to stop initiating merges.
const PASSIVE_WEIGHT_FACTOR: AccWeight = 2.0;

/// One item of the working level: a uniform view over nodes and clusters
/// for the duration of the pass.
struct WorkEntry {
    key: ItemRef,
    self_weight: AccWeight,
    /// Outgoing arcs as (level-local destination, weight), sorted by dest
    links: Vec<(u32, AccWeight)>,
}

/// A merge group formed during one pass.
struct Group {
    /// Level-local member indices, ascending; never fewer than two
    members: Vec<u32>,
    /// Level-local index of the member picked as the cluster core
    core: u32,
}

/// Where a next-level entry comes from.
enum Origin {
    /// A freshly merged group
    Group(u32),
    /// An item promoted unchanged from the current level
    Carried(u32),
}

struct PendingEntry {
    origin: Origin,
    self_weight: AccWeight,
    links: Vec<(u32, AccWeight)>,
}

struct PassOutcome {
    groups: Vec<Group>,
    /// Level-local item index -> indices of the groups it joined
    membership: Vec<Vec<u32>>,
    /// The next working level, groups first, carried items after
    next: Vec<PendingEntry>,
}

/// Perform clustering and build the hierarchy.
///
/// Wraps the finalized nodes as the bottom level and runs merge passes
/// until no merge yields progress or the modularity profit margin is
/// crossed.
pub fn cluster(mut nodes: Nodes, opts: &ClusterOptions) -> Result<Hierarchy, GraphError> {
    log::debug!(
        "clustering {} nodes: symmetric: {}, validate: {}, fast: {}, margin: {}",
        nodes.len(),
        opts.symmetric,
        opts.validate,
        opts.fast,
        opts.mod_profit_margin
    );

    if opts.validate {
        validate_links(&mut nodes, opts.symmetric)?;
    }

    let arc_mass: AccWeight = nodes
        .iter()
        .flat_map(|n| &n.links)
        .map(|l| l.weight as AccWeight)
        .sum();
    let self_weights: Vec<AccWeight> = nodes.iter().map(|n| n.self_weight as AccWeight).collect();
    let w_total = network_weight(&self_weights, arc_mass);

    let mut clusters: Vec<Cluster> = Vec::new();
    let mut levels: Vec<Vec<u32>> = Vec::new();

    if !acc_positive(w_total) {
        // A weightless graph has nothing to optimise.
        return Ok(Hierarchy::new(
            nodes,
            clusters,
            levels,
            Vec::new(),
            Score { modularity: 0.0 },
        ));
    }

    let mut cur = bottom_level(&nodes);
    let mut q = level_modularity_of(cur.iter().map(|e| (e.self_weight, &e.links)), w_total);
    let trace = opts.mod_profit_margin != -1.0;

    loop {
        let ids: Vec<Id> = cur.iter().map(|e| item_id(&nodes, &clusters, e.key)).collect();
        let Some(outcome) = run_pass(&cur, &ids, w_total, opts) else {
            break;
        };
        let q_next = level_modularity_of(
            outcome.next.iter().map(|e| (e.self_weight, &e.links)),
            w_total,
        );
        let delta = q_next - q;
        if trace {
            log::info!(
                "pass {}: {} merges, modularity {:.6} -> {:.6} (delta {:+.6})",
                levels.len(),
                outcome.groups.len(),
                q,
                q_next,
                delta
            );
        }
        if delta <= opts.mod_profit_margin {
            // The level does not pay for itself; discard it.
            break;
        }
        cur = commit(&mut nodes, &mut clusters, &mut levels, cur, outcome);
        q = q_next;
    }

    let root: Vec<u32> = levels
        .last()
        .map(|level| {
            level
                .iter()
                .copied()
                .filter(|&c| clusters[c as usize].owners.is_empty())
                .collect()
        })
        .unwrap_or_default();

    log::debug!(
        "clustering done: {} clusters over {} levels, {} roots, modularity {:.6}",
        clusters.len(),
        levels.len(),
        root.len(),
        q
    );

    Ok(Hierarchy::new(nodes, clusters, levels, root, Score { modularity: q }))
}

/// Check and repair link symmetry before clustering starts.
///
/// Every link must have a back-link at the same level. On symmetric graphs
/// a missing or weight-mismatched mirror is a domain error; on asymmetric
/// graphs the missing direction is inserted with zero weight.
fn validate_links(nodes: &mut Nodes, symmetric: bool) -> Result<(), GraphError> {
    for i in 0..nodes.len() {
        for link in &nodes[i].links {
            if link.dest as usize == i {
                return Err(GraphError::SelfLinkEntry { id: nodes[i].id });
            }
        }
        graph::sort_links(nodes, i);
    }

    let mut missing: Vec<(u32, u32)> = Vec::new();
    for u in 0..nodes.len() {
        for k in 0..nodes[u].links.len() {
            let link = nodes[u].links[k];
            let v = link.dest as usize;
            match graph::find_link(nodes, v, u as u32) {
                Some(pos) => {
                    let back = nodes[v].links[pos].weight;
                    if symmetric && !acc_eq(link.weight as AccWeight, back as AccWeight) {
                        return Err(GraphError::AsymmetricLink {
                            src: nodes[u].id,
                            dst: nodes[v].id,
                        });
                    }
                }
                None => {
                    if symmetric {
                        return Err(GraphError::AsymmetricLink {
                            src: nodes[u].id,
                            dst: nodes[v].id,
                        });
                    }
                    missing.push((v as u32, u as u32));
                }
            }
        }
    }
    missing.sort_unstable();
    missing.dedup();
    for (src, dst) in missing {
        nodes[src as usize].links.push(graph::Link { dest: dst, weight: 0.0 });
        graph::sort_links(nodes, src as usize);
    }
    Ok(())
}

/// Wrap the finalized nodes as the bottom working level.
///
/// Node link lists are projected into the uniform per-level view; parallel
/// links to the same destination merge additively.
fn bottom_level(nodes: &Nodes) -> Vec<WorkEntry> {
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let mut links: Vec<(u32, AccWeight)> = Vec::with_capacity(node.links.len());
            for link in &node.links {
                links.push((link.dest, link.weight as AccWeight));
            }
            links.sort_unstable_by_key(|&(dest, _)| dest);
            links.dedup_by(|b, a| {
                if a.0 == b.0 {
                    a.1 += b.1;
                    true
                } else {
                    false
                }
            });
            WorkEntry {
                key: ItemRef::Node(i as u32),
                self_weight: node.self_weight as AccWeight,
                links,
            }
        })
        .collect()
}

fn item_id(nodes: &Nodes, clusters: &[Cluster], key: ItemRef) -> Id {
    match key {
        ItemRef::Node(i) => nodes[i as usize].id,
        ItemRef::Cluster(c) => clusters[c as usize].id,
    }
}

/// Weight of an item's link toward a level-local destination, zero if the
/// link is absent.
fn link_weight_to(entry: &WorkEntry, dest: u32) -> AccWeight {
    entry
        .links
        .binary_search_by_key(&dest, |&(d, _)| d)
        .map(|pos| entry.links[pos].1)
        .unwrap_or(0.0)
}

fn level_modularity_of<'a, I>(items: I, w_total: AccWeight) -> AccWeight
where
    I: Iterator<Item = (AccWeight, &'a Vec<(u32, AccWeight)>)>,
{
    let mut q = 0.0;
    for (sw, links) in items {
        let out: AccWeight = links.iter().map(|&(_, w)| w).sum();
        q += item_modularity(sw, saturating(sw + out), w_total);
    }
    q
}

/// Run one pass over the current level. Returns `None` when no merge
/// occurred (the level is stable and clustering terminates).
fn run_pass(
    cur: &[WorkEntry],
    ids: &[Id],
    w_total: AccWeight,
    opts: &ClusterOptions,
) -> Option<PassOutcome> {
    let n = cur.len();
    if n < 2 {
        return None;
    }

    let mut ctx: Vec<Context> = (0..n).map(|_| Context::default()).collect();
    for (i, entry) in cur.iter().enumerate() {
        let out: AccWeight = entry.links.iter().map(|&(_, w)| w).sum();
        ctx[i].weight = saturating(entry.self_weight + out);
    }

    // Gains, max gain and the best-candidate frontier per item.
    let mut best: Vec<Vec<u32>> = vec![Vec::new(); n];
    for (i, entry) in cur.iter().enumerate() {
        if acc_saturated(ctx[i].weight) {
            // Saturated items drop out of gain computation entirely.
            ctx[i].tag = Clusterable::None;
            continue;
        }
        let wt_i = ctx[i].weight;
        let mut gmax = crate::types::ACCWEIGHT_NONE;
        let mut cpg = 0.0;
        for &(j, w_ij) in &entry.links {
            let wt_j = ctx[j as usize].weight;
            if acc_saturated(wt_j) {
                continue;
            }
            let g = if opts.symmetric {
                gain_symmetric(w_ij, wt_i, wt_j, w_total)
            } else {
                let w_ji = link_weight_to(&cur[j as usize], i as u32);
                gain_asymmetric(w_ij, w_ji, wt_i, wt_j, w_total)
            };
            if acc_positive(g) {
                cpg += g;
            }
            if best[i].is_empty() || acc_less(gmax, g) {
                gmax = g;
                best[i].clear();
                best[i].push(j);
            } else if acc_eq(g, gmax) {
                best[i].push(j);
            }
        }
        ctx[i].gmax = gmax;
        ctx[i].cpg = cpg;
        ctx[i].tag = if best[i].is_empty() || !acc_positive(gmax) {
            best[i].clear();
            Clusterable::None
        } else if best[i].len() > 1 {
            Clusterable::Multiple
        } else {
            Clusterable::Single
        };
    }

    // Mutual agreement: j is a candidate of i iff both picked each other;
    // a one-way pick is recorded as an incoming request on its target.
    let mut picked = vec![false; n];
    for i in 0..n {
        if !ctx[i].tag.initiates() {
            continue;
        }
        for k in 0..best[i].len() {
            let j = best[i][k] as usize;
            picked[j] = true;
            if best[j].binary_search(&(i as u32)).is_ok() {
                ctx[i].cands.push(j as u32);
            } else {
                ctx[j].reqs.push(i as u32);
            }
        }
    }
    for i in 0..n {
        if matches!(ctx[i].tag, Clusterable::Single | Clusterable::Multiple)
            && ctx[i].cands.is_empty()
        {
            ctx[i].tag = Clusterable::NonMutual;
        }
    }

    // Heavy items go passive: they no longer initiate but may be pulled in.
    for i in 0..n {
        if ctx[i].cands.is_empty() {
            continue;
        }
        let entry = &cur[i];
        let mut link_mass = 0.0;
        let mut weighted_sum = 0.0;
        for &j in &ctx[i].cands {
            let w_ij = link_weight_to(entry, j);
            link_mass += w_ij;
            weighted_sum += w_ij * ctx[j as usize].weight;
        }
        if !acc_positive(link_mass) {
            continue;
        }
        let mean = weighted_sum / link_mass;
        if acc_less(PASSIVE_WEIGHT_FACTOR * mean, ctx[i].weight) {
            ctx[i].tag = if picked[i] {
                Clusterable::Passive
            } else {
                Clusterable::PassiveFixed
            };
        }
    }

    fix_chains(&mut ctx, &best, ids);

    // Merge resolution: walk the level in order; initiators pull their
    // mutual candidates into groups. A candidate set that is not mutually
    // connected splits into disjoint groups, and a tied item joining
    // several of them becomes a shared (overlapping) descendant.
    let mut membership: Vec<Vec<u32>> = vec![Vec::new(); n];
    let mut groups: Vec<Group> = Vec::new();
    for i in 0..n {
        if !ctx[i].tag.initiates() {
            continue;
        }
        if membership[i].len() >= group_cap(&ctx[i]) {
            continue;
        }
        let avail: Vec<u32> = ctx[i]
            .cands
            .iter()
            .copied()
            .filter(|&j| candidate_available(i, j as usize, &ctx, &membership))
            .collect();
        if avail.is_empty() {
            continue;
        }
        let mut subgroups: Vec<Vec<u32>> = Vec::new();
        for &c in &avail {
            let mut placed = false;
            for sub in &mut subgroups {
                if sub
                    .iter()
                    .all(|&m| ctx[m as usize].cands.binary_search(&c).is_ok())
                {
                    sub.push(c);
                    placed = true;
                    break;
                }
            }
            if !placed {
                subgroups.push(vec![c]);
            }
        }
        for sub in subgroups {
            if membership[i].len() >= group_cap(&ctx[i]) {
                break;
            }
            let gidx = groups.len() as u32;
            let mut members = sub;
            members.push(i as u32);
            members.sort_unstable();
            for &m in &members {
                membership[m as usize].push(gidx);
            }
            groups.push(Group {
                core: pick_core(&members, &ctx),
                members,
            });
        }
    }

    // Quasi-mutual relaxation: a one-way request is accepted only when the
    // sink has no mutual candidate and is still unmerged on this pass.
    if opts.fast {
        for t in 0..n {
            if ctx[t].tag == Clusterable::None
                || !ctx[t].cands.is_empty()
                || !membership[t].is_empty()
                || ctx[t].reqs.is_empty()
            {
                continue;
            }
            let rs: Vec<u32> = ctx[t]
                .reqs
                .iter()
                .copied()
                .filter(|&r| {
                    membership[r as usize].is_empty() && !ctx[r as usize].tag.is_passive()
                })
                .collect();
            if rs.is_empty() {
                continue;
            }
            let gidx = groups.len() as u32;
            let mut members = rs;
            members.push(t as u32);
            members.sort_unstable();
            for &m in &members {
                membership[m as usize].push(gidx);
            }
            groups.push(Group {
                core: pick_core(&members, &ctx),
                members,
            });
        }
    }

    if groups.is_empty() {
        return None;
    }

    Some(accumulate(cur, groups, membership))
}

/// How many disjoint groups an item may be shared between.
fn group_cap(ctx: &Context) -> usize {
    if ctx.cands.len() > 1 {
        ctx.cands.len()
    } else {
        1
    }
}

fn candidate_available(i: usize, j: usize, ctx: &[Context], membership: &[Vec<u32>]) -> bool {
    if membership[j].len() >= group_cap(&ctx[j]) {
        return false;
    }
    // Already grouped together.
    !membership[i]
        .iter()
        .any(|g| membership[j].contains(g))
}

/// The member with the largest max gain explains the cluster.
fn pick_core(members: &[u32], ctx: &[Context]) -> u32 {
    let mut core = members[0];
    for &m in &members[1..] {
        let (c, n) = (&ctx[core as usize], &ctx[m as usize]);
        if acc_less(c.gmax, n.gmax) || (acc_eq(c.gmax, n.gmax) && acc_less(c.cpg, n.cpg)) {
            core = m;
        }
    }
    core
}

/// Break request cycles: a chain `a -> b -> c -> a` of unreciprocated picks
/// with no mutual candidate anywhere is resolved by passivating its
/// lowest-id member, so the remainder can merge into it without
/// contradiction.
fn fix_chains(ctx: &mut [Context], best: &[Vec<u32>], ids: &[Id]) {
    const IN_WALK: u8 = 1;
    const DONE: u8 = 2;
    let n = ctx.len();
    let mut state = vec![0u8; n];
    for start in 0..n {
        if state[start] != 0 || ctx[start].tag != Clusterable::NonMutual {
            continue;
        }
        let mut path: Vec<usize> = Vec::new();
        let mut cur = start;
        loop {
            if ctx[cur].tag != Clusterable::NonMutual || best[cur].is_empty() {
                break;
            }
            match state[cur] {
                DONE => break,
                IN_WALK => {
                    let pos = path.iter().position(|&x| x == cur).expect("walk state");
                    let fix = path[pos..]
                        .iter()
                        .copied()
                        .min_by_key(|&x| ids[x])
                        .expect("cycle is non-empty");
                    ctx[fix].tag = Clusterable::PassiveCFixed;
                    break;
                }
                _ => {
                    state[cur] = IN_WALK;
                    path.push(cur);
                    cur = best[cur][0] as usize;
                }
            }
        }
        for x in path {
            state[x] = DONE;
        }
    }
}

/// Materialise the next level: compute accumulated links and self-weights
/// of the merge groups and re-express carried items against them.
///
/// A descendant shared between `n` owners contributes `1/n` of its mass to
/// each, so the total network weight is conserved across levels; an arc
/// whose endpoints land in the same owner feeds its self-weight, counted
/// once per arc pair.
fn accumulate(cur: &[WorkEntry], groups: Vec<Group>, membership: Vec<Vec<u32>>) -> PassOutcome {
    let n = cur.len();
    let g = groups.len();

    let mut carried: Vec<Option<u32>> = vec![None; n];
    let mut next_len = g;
    for i in 0..n {
        if membership[i].is_empty() {
            carried[i] = Some(next_len as u32);
            next_len += 1;
        }
    }
    let targets = |i: usize| -> Vec<u32> {
        match carried[i] {
            Some(t) => vec![t],
            None => membership[i].clone(),
        }
    };

    let mut self_weights = vec![0.0; next_len];
    let mut links: Vec<HashMap<u32, AccWeight>> = vec![HashMap::new(); next_len];

    for (d, entry) in cur.iter().enumerate() {
        let td = targets(d);
        let nd = td.len() as AccWeight;
        for &a in &td {
            self_weights[a as usize] += entry.self_weight / nd;
        }
        for &(e, w) in &entry.links {
            let te = targets(e as usize);
            let share = w / (nd * te.len() as AccWeight);
            for &a in &td {
                for &b in &te {
                    if a == b {
                        self_weights[a as usize] += share / 2.0;
                    } else {
                        *links[a as usize].entry(b).or_insert(0.0) += share;
                    }
                }
            }
        }
    }

    let mut next: Vec<PendingEntry> = Vec::with_capacity(next_len);
    for t in 0..next_len {
        let origin = if t < g {
            Origin::Group(t as u32)
        } else {
            let old = carried
                .iter()
                .position(|&c| c == Some(t as u32))
                .expect("carried slot");
            Origin::Carried(old as u32)
        };
        let mut entry_links: Vec<(u32, AccWeight)> = links[t]
            .iter()
            .map(|(&dest, &w)| (dest, saturating(w)))
            .collect();
        entry_links.sort_unstable_by_key(|&(dest, _)| dest);
        next.push(PendingEntry {
            origin,
            self_weight: saturating(self_weights[t]),
            links: entry_links,
        });
    }

    PassOutcome {
        groups,
        membership,
        next,
    }
}

/// Commit a pass: materialise the new clusters, assign ownership and turn
/// the pending entries into the next working level.
fn commit(
    nodes: &mut Nodes,
    clusters: &mut Vec<Cluster>,
    levels: &mut Vec<Vec<u32>>,
    cur: Vec<WorkEntry>,
    outcome: PassOutcome,
) -> Vec<WorkEntry> {
    // Group index -> cluster arena index.
    let mut group_arena: Vec<u32> = Vec::with_capacity(outcome.groups.len());
    for group in &outcome.groups {
        let des: Vec<ItemRef> = group
            .members
            .iter()
            .map(|&m| cur[m as usize].key)
            .collect();
        let core = Some(cur[group.core as usize].key);
        let arena_idx = clusters.len() as u32;
        clusters.push(Cluster::new(des, core));
        group_arena.push(arena_idx);
    }

    for (i, groups_of) in outcome.membership.iter().enumerate() {
        for &gidx in groups_of {
            let owner = group_arena[gidx as usize];
            match cur[i].key {
                ItemRef::Node(idx) => nodes[idx as usize].owners.push(owner),
                ItemRef::Cluster(idx) => clusters[idx as usize].owners.push(owner),
            }
        }
    }

    // Resolve pending entries into the next working level, and store the
    // accumulated link lists on the cluster entities.
    let resolve: Vec<ItemRef> = outcome
        .next
        .iter()
        .map(|e| match e.origin {
            Origin::Group(gidx) => ItemRef::Cluster(group_arena[gidx as usize]),
            Origin::Carried(old) => cur[old as usize].key,
        })
        .collect();

    let mut level: Vec<u32> = Vec::new();
    let mut next_level: Vec<WorkEntry> = Vec::with_capacity(outcome.next.len());
    for (t, pending) in outcome.next.into_iter().enumerate() {
        let key = resolve[t];
        if let ItemRef::Cluster(ci) = key {
            level.push(ci);
            let entity = &mut clusters[ci as usize];
            entity.self_weight = pending.self_weight;
            entity.links = pending
                .links
                .iter()
                .map(|&(dest, weight)| AccLink {
                    dest: resolve[dest as usize],
                    weight,
                })
                .collect();
        }
        next_level.push(WorkEntry {
            key,
            self_weight: pending.self_weight,
            links: pending.links,
        });
    }
    levels.push(level);
    next_level
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, InputLink, Link, Node};

    #[test]
    fn validation_inserts_zero_back_links() {
        let mut g = Graph::new(true, 2);
        g.add_node_and_links(0, &[InputLink::new(1, 2.0)], true).unwrap();
        let mut nodes = g.finalize().unwrap();
        validate_links(&mut nodes, false).unwrap();
        let n1 = nodes.iter().find(|n| n.id == 1).unwrap();
        assert_eq!(n1.links.len(), 1);
        assert_eq!(n1.links[0].weight, 0.0);
    }

    #[test]
    fn validation_rejects_self_entries() {
        let mut nodes = vec![Node::new(3)];
        nodes[0].links.push(Link { dest: 0, weight: 1.0 });
        let err = validate_links(&mut nodes, true).unwrap_err();
        assert_eq!(err, GraphError::SelfLinkEntry { id: 3 });
    }

    #[test]
    fn validation_rejects_mismatched_mirror_weights() {
        let mut nodes = vec![Node::new(0), Node::new(1)];
        nodes[0].links.push(Link { dest: 1, weight: 2.0 });
        nodes[1].links.push(Link { dest: 0, weight: 1.0 });
        let err = validate_links(&mut nodes, true).unwrap_err();
        assert!(matches!(err, GraphError::AsymmetricLink { .. }));
    }

    #[test]
    fn weightless_graph_yields_empty_hierarchy() {
        let mut g = Graph::new(true, 3);
        g.add_nodes(&[0, 1, 2]).unwrap();
        let hier = cluster(g.finalize().unwrap(), &ClusterOptions::default()).unwrap();
        assert!(hier.clusters().is_empty());
        assert!(hier.root().is_empty());
        assert_eq!(hier.score().modularity, 0.0);
    }

    #[test]
    fn single_edge_merges_into_one_root() {
        let mut g = Graph::new(true, 2);
        g.add_node_and_links(0, &[InputLink::new(1, 1.0)], false).unwrap();
        let hier = cluster(g.finalize().unwrap(), &ClusterOptions::default()).unwrap();
        assert_eq!(hier.clusters().len(), 1);
        assert_eq!(hier.root().len(), 1);
        let root = &hier.clusters()[hier.root()[0] as usize];
        assert_eq!(root.des.len(), 2);
        assert!(root.links.is_empty());
    }
}
