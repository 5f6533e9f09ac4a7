//! Command handlers.
//!
//! Each handler reads its inputs, runs one placement operation and returns the
//! text to print. Topologies are exchanged as JSON documents on disk.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use shardmap_core::{ClusterConfig, Config};
use shardmap_placement::{
    get_topology, validate_legacy_cluster_config, HostId, HostInfo, PartitionId, Topology,
};
use tracing::{info, warn};

use crate::cli::{
    AddHostsArgs, BuildArgs, OutputFormat, RecoverArgs, RemoveHostsArgs, RestoreArgs, RouteArgs,
    TopologyArgs, ValidateArgs,
};

/// Outcome of the route command.
#[derive(Debug, Serialize)]
struct RouteResult<'a> {
    key: &'a str,
    partition_id: Option<PartitionId>,
    leader: Option<HostId>,
}

/// One protection group as printed by the groups command.
#[derive(Debug, Serialize)]
struct ProtectionGroup {
    first_partition: PartitionId,
    last_partition: PartitionId,
    hosts: Vec<HostId>,
}

/// Handle `build`.
pub fn handle_build(args: &BuildArgs, config: Option<&Config>, format: OutputFormat) -> Result<String> {
    let cluster = &require_config(config)?.cluster;
    let hosts = host_infos(cluster);
    let k_factor = k_factor(cluster)?;

    if let Some(sites) = hosts.values().map(|h| h.local_sites_count).next() {
        if let Some(reason) = validate_legacy_cluster_config(hosts.len(), sites, k_factor) {
            warn!(%reason, "Cluster shape does not divide evenly");
        }
    }

    let topology = get_topology(&hosts, &cluster.missing_hosts(), k_factor, cluster.restore_partitions)
        .context("Failed to build topology")?;
    write_output(args.output.as_deref(), &topology)?;

    let mut out = String::new();
    if format == OutputFormat::Text {
        writeln!(out, "Built {} partitions over {} hosts", topology.partition_count(), topology.host_count())?;
    }
    out.push_str(&render(&topology, format)?);
    Ok(out)
}

/// Handle `add-hosts`.
pub fn handle_add_hosts(args: &AddHostsArgs, config: Option<&Config>, format: OutputFormat) -> Result<String> {
    let cluster = &require_config(config)?.cluster;
    let current = read_topology(&args.input)?;
    let hosts = host_infos(cluster);
    let (topology, added) = if current.is_initialized() {
        current.add_new_hosts(&hosts)
    } else {
        current.add_new_hosts_with_k_factor(&hosts, k_factor(cluster)?)
    }
    .context("Failed to add hosts")?;
    write_output(args.output.as_deref(), &topology)?;

    let mut out = String::new();
    if format == OutputFormat::Text {
        writeln!(out, "Added partitions {}", join(&added))?;
    }
    out.push_str(&render(&topology, format)?);
    Ok(out)
}

/// Handle `remove-hosts`.
pub fn handle_remove_hosts(args: &RemoveHostsArgs, format: OutputFormat) -> Result<String> {
    let current = read_topology(&args.input)?;
    let hosts: BTreeSet<HostId> = args.hosts.iter().copied().collect();
    let (topology, removed) = current.remove_hosts(&hosts).context("Failed to remove hosts")?;
    write_output(args.output.as_deref(), &topology)?;

    let mut out = String::new();
    if format == OutputFormat::Text {
        writeln!(out, "Removed partitions {}", join(&removed))?;
    }
    out.push_str(&render(&topology, format)?);
    Ok(out)
}

/// Handle `recover`.
pub fn handle_recover(args: &RecoverArgs, format: OutputFormat) -> Result<String> {
    let current = read_topology(&args.input)?;
    let live: BTreeSet<HostId> = args.live.iter().copied().collect();
    let previous: Option<BTreeSet<PartitionId>> =
        args.partitions.as_ref().map(|ids| ids.iter().copied().collect());

    let Some(topology) =
        current.recover_topology(&live, args.local_host, &args.placement_group, previous.as_ref())
    else {
        bail!(
            "No missing host in placement group {} can be recovered by host {}",
            args.placement_group,
            args.local_host
        );
    };
    write_output(args.output.as_deref(), &topology)?;

    let mut out = String::new();
    if format == OutputFormat::Text {
        writeln!(
            out,
            "Host {} took over partitions {}",
            args.local_host,
            join(&topology.partition_ids_for_host(args.local_host))
        )?;
    }
    out.push_str(&render(&topology, format)?);
    Ok(out)
}

/// Handle `restore`.
pub fn handle_restore(args: &RestoreArgs, config: Option<&Config>, format: OutputFormat) -> Result<String> {
    let cluster = &require_config(config)?.cluster;
    let current = read_topology(&args.input)?;
    let topology = current.restore_partitions_for_recovery(&host_infos(cluster), &cluster.missing_hosts());
    write_output(args.output.as_deref(), &topology)?;

    let mut out = String::new();
    if format == OutputFormat::Text {
        if topology.version() == current.version() {
            writeln!(out, "Layout left unchanged")?;
        } else {
            writeln!(out, "Restored previous layout")?;
        }
    }
    out.push_str(&render(&topology, format)?);
    Ok(out)
}

/// Handle `validate`.
pub fn handle_validate(args: &ValidateArgs, format: OutputFormat) -> Result<String> {
    let topology = read_topology(&args.input)?;
    let live: BTreeSet<HostId> = match &args.live {
        Some(ids) => ids.iter().copied().collect(),
        None => topology.hosts().values().filter(|h| !h.is_missing).map(|h| h.id).collect(),
    };
    let reason = topology.validate_layout(&live);

    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
            "valid": reason.is_none(),
            "reason": reason,
        }))?,
        OutputFormat::Text => match reason {
            Some(reason) => format!("Layout is invalid: {reason}\n"),
            None => "Layout is valid\n".to_string(),
        },
    })
}

/// Handle `groups`.
pub fn handle_groups(args: &TopologyArgs, format: OutputFormat) -> Result<String> {
    let topology = read_topology(args)?;
    let groups: Vec<ProtectionGroup> = topology
        .get_partition_groups()
        .iter()
        .map(|(range, hosts)| ProtectionGroup {
            first_partition: *range.start(),
            last_partition: *range.end(),
            hosts: hosts.iter().copied().collect(),
        })
        .collect();

    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&groups)?),
        OutputFormat::Text => {
            let mut out = String::new();
            for group in &groups {
                writeln!(
                    out,
                    "Partitions {}..={}: hosts {}",
                    group.first_partition,
                    group.last_partition,
                    join(&group.hosts)
                )?;
            }
            Ok(out)
        }
    }
}

/// Handle `route`.
pub fn handle_route(args: &RouteArgs, format: OutputFormat) -> Result<String> {
    let topology = read_topology(&args.input)?;
    let result = RouteResult {
        key: &args.key,
        partition_id: topology.partition_for_key(args.key.as_bytes()),
        leader: topology.leader_for_key(args.key.as_bytes()),
    };

    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => match (result.partition_id, result.leader) {
            (Some(partition), Some(leader)) => {
                Ok(format!("{} -> partition {partition} (leader {leader})\n", result.key))
            }
            _ => bail!("Topology has no partitions to route to"),
        },
    }
}

fn require_config(config: Option<&Config>) -> Result<&Config> {
    config.context("This command needs a cluster configuration (--config)")
}

fn k_factor(cluster: &ClusterConfig) -> Result<u32> {
    u32::try_from(cluster.k_factor).context("k_factor must not be negative")
}

/// Membership information for every configured host.
fn host_infos(cluster: &ClusterConfig) -> BTreeMap<HostId, HostInfo> {
    cluster
        .hosts
        .iter()
        .map(|h| {
            let info = HostInfo::new(h.placement_group.as_str(), h.ip_address.as_str(), h.sites)
                .with_recovered_partitions(h.recovered_partitions.iter().copied());
            (h.id, info)
        })
        .collect()
}

fn read_topology(args: &TopologyArgs) -> Result<Topology> {
    let json = std::fs::read_to_string(&args.topology)
        .with_context(|| format!("Failed to read topology {}", args.topology.display()))?;
    Topology::from_json(&json)
        .with_context(|| format!("Failed to parse topology {}", args.topology.display()))
}

fn write_output(path: Option<&Path>, topology: &Topology) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    std::fs::write(path, topology.to_json_pretty()?)
        .with_context(|| format!("Failed to write topology {}", path.display()))?;
    info!(path = %path.display(), version = topology.version(), "Wrote topology");
    Ok(())
}

fn render(topology: &Topology, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => topology.to_json_pretty()?,
        OutputFormat::Text => topology.to_string(),
    })
}

fn join<'a>(ids: impl IntoIterator<Item = &'a u32>) -> String {
    ids.into_iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}
