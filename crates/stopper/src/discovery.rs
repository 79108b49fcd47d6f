//! Discovery of untracked service processes, by image name or by the
//! process currently bound to a listening port.
//!
//! Both methods are inherently imprecise: an image name may match several
//! unrelated processes, and port ownership can change between lookup and
//! kill. Callers apply an explicit kill-all-matches policy and log every
//! terminated pid rather than pretending precision that does not exist.

use std::ffi::OsStr;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::debug;

/// Pids of every running process whose image name matches exactly.
///
/// The calling process itself is never included.
#[must_use]
pub fn pids_by_image_name(image: &str) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing(),
    );

    let own_pid = std::process::id();
    let mut pids: Vec<u32> = system
        .processes()
        .iter()
        .filter(|(_, process)| process.name() == OsStr::new(image))
        .map(|(pid, _)| pid.as_u32())
        .filter(|&pid| pid != own_pid)
        .collect();
    pids.sort_unstable();

    debug!(image, matches = pids.len(), "image name discovery");
    pids
}

/// Pids of the processes holding a socket listening on `port`.
///
/// An empty result means nothing is bound there; that is not an error.
///
/// # Errors
///
/// Returns an error if the kernel socket tables cannot be read.
#[cfg(target_os = "linux")]
pub fn pids_by_port(port: u16) -> std::io::Result<Vec<u32>> {
    let mut inodes = Vec::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        if let Ok(raw) = std::fs::read_to_string(table) {
            inodes.extend(parse_listener_inodes(&raw, port));
        }
    }
    if inodes.is_empty() {
        return Ok(Vec::new());
    }

    let mut pids = Vec::new();
    for entry in std::fs::read_dir("/proc")? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };

        // Unreadable fd tables (other owners' processes) are skipped, not
        // errors; discovery reports what it can see.
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            if let Ok(target) = std::fs::read_link(fd.path()) {
                let target = target.to_string_lossy();
                if inodes
                    .iter()
                    .any(|inode| target == format!("socket:[{inode}]"))
                {
                    pids.push(pid);
                    break;
                }
            }
        }
    }

    pids.sort_unstable();
    pids.dedup();
    debug!(port, matches = pids.len(), "port owner discovery");
    Ok(pids)
}

/// Port-owner discovery reads kernel socket tables and is Linux-only.
#[cfg(not(target_os = "linux"))]
pub fn pids_by_port(port: u16) -> std::io::Result<Vec<u32>> {
    tracing::warn!(port, "port owner discovery is not supported on this platform");
    Ok(Vec::new())
}

/// Extracts the socket inodes of LISTEN entries bound to `port` from a
/// `/proc/net/tcp`-format table.
#[cfg(target_os = "linux")]
fn parse_listener_inodes(table: &str, port: u16) -> Vec<u64> {
    const STATE_LISTEN: &str = "0A";

    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let local = fields.get(1)?;
            let state = fields.get(3)?;
            let inode = fields.get(9)?;

            let local_port = u16::from_str_radix(local.rsplit(':').next()?, 16).ok()?;
            (*state == STATE_LISTEN && local_port == port)
                .then(|| inode.parse::<u64>().ok())
                .flatten()
        })
        .collect()
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    const TCP_TABLE: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 41111 1 0000000000000000 100 0 0 10 0
   1: 0100007F:1538 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 42222 1 0000000000000000 100 0 0 10 0
   2: 0100007F:1F90 0100007F:9C40 01 00000000:00000000 00:00000000 00000000  1000        0 43333 1 0000000000000000 100 0 0 10 0
";

    #[test]
    fn finds_listen_inodes_for_the_port() {
        // 0x1F90 == 8080; the established row on the same port is ignored.
        assert_eq!(parse_listener_inodes(TCP_TABLE, 8080), vec![41111]);
        assert_eq!(parse_listener_inodes(TCP_TABLE, 5432), vec![42222]);
        assert!(parse_listener_inodes(TCP_TABLE, 9999).is_empty());
    }

    #[test]
    fn unbound_port_is_a_no_op() {
        // Pick a port from the dynamic range nothing in CI listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(pids_by_port(port).unwrap().is_empty());
    }

    #[test]
    fn finds_our_own_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let pids = pids_by_port(port).unwrap();
        assert!(pids.contains(&std::process::id()));
    }
}
