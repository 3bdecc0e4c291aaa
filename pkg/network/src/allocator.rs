use pkg_constants::network::{MAX_ALLOCATION_ATTEMPTS, RESERVED_FIRST_OCTET, RESERVED_SECOND_OCTET};
use pkg_container::{BackendError, ContainerBackend, CreateOutcome};
use pkg_types::labels::{self, Labels};
use pkg_types::{NetworkHandle, NetworkInfo, Subnet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    /// The block after `highest` falls outside the reserved range.
    #[error("reserved address space exhausted (highest block in use: {highest})")]
    AddressSpaceExhausted { highest: Subnet },

    #[error("could not claim a subnet for network {name} after {attempts} attempts")]
    Contended { name: String, attempts: u32 },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// First address of the reserved range, `172.33.0.0`.
fn reserved_start() -> u32 {
    u32::from(Ipv4Addr::new(RESERVED_FIRST_OCTET, RESERVED_SECOND_OCTET, 0, 0))
}

/// Last address of the reserved range, `172.255.255.255`.
fn reserved_end() -> u32 {
    u32::from(Ipv4Addr::new(RESERVED_FIRST_OCTET, 255, 255, 255))
}

fn block_size() -> u64 {
    block_at(reserved_start()).size()
}

fn in_reserved_range(subnet: &Subnet) -> bool {
    subnet.first_u32() <= reserved_end() && subnet.last_u32() >= reserved_start()
}

/// The next free workspace block given every network the backend knows about.
///
/// Any network touching the reserved range counts, whoever created it. The
/// highest one is the one covering the greatest address (ties broken by the
/// greater base address), and the new block starts at the next /24 boundary
/// after it.
pub fn next_subnet(networks: &[NetworkInfo]) -> Result<Subnet, AllocationError> {
    let highest = networks
        .iter()
        .filter_map(|n| n.subnet)
        .filter(in_reserved_range)
        .max_by_key(|s| (s.last_u32(), s.first_u32()));

    let Some(highest) = highest else {
        return Ok(block_at(reserved_start()));
    };

    let block = block_size();
    let next = (u64::from(highest.last_u32()) + 1).div_ceil(block) * block;
    if next + block - 1 > u64::from(reserved_end()) {
        return Err(AllocationError::AddressSpaceExhausted { highest });
    }
    Ok(block_at(next as u32))
}

fn block_at(base: u32) -> Subnet {
    Subnet::block24(Ipv4Addr::from(base))
}

/// Finds or creates the per-user network.
///
/// Nothing is cached: every call re-reads the backend's full network list,
/// since other processes (or a previous incarnation of the hub) mutate it.
pub struct SubnetAllocator {
    backend: Arc<dyn ContainerBackend>,
    hub_name: String,
}

impl SubnetAllocator {
    pub fn new(backend: Arc<dyn ContainerBackend>, hub_name: &str) -> Self {
        Self {
            backend,
            hub_name: hub_name.to_string(),
        }
    }

    /// Return the network called `name` (case-insensitive), creating it in the
    /// next free block if it does not exist yet.
    pub async fn allocate_or_get(
        &self,
        name: &str,
        extra_labels: &Labels,
    ) -> Result<NetworkHandle, AllocationError> {
        let mut labels = extra_labels.clone();
        labels.extend(labels::origin_labels(&self.hub_name));

        for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
            let networks = self.backend.list_networks().await?;
            if let Some(existing) = networks.iter().find(|n| n.name.eq_ignore_ascii_case(name)) {
                debug!("Network {} already exists ({:?})", name, existing.subnet);
                return Ok(existing.clone().into());
            }

            let subnet = next_subnet(&networks)?;
            match self.backend.create_network(name, &subnet, &labels).await {
                Ok(CreateOutcome::Created(handle)) => {
                    info!(
                        "Allocated network {} with subnet {} (gateway {})",
                        name,
                        subnet,
                        subnet.gateway()
                    );
                    return Ok(handle);
                }
                Ok(CreateOutcome::AlreadyExists(handle)) => {
                    info!("Network {} was created concurrently, reusing it", name);
                    return Ok(handle);
                }
                Err(BackendError::SubnetConflict(msg)) => {
                    warn!(
                        "Subnet {} for network {} was taken (attempt {}/{}): {}",
                        subnet, name, attempt, MAX_ALLOCATION_ATTEMPTS, msg
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AllocationError::Contended {
            name: name.to_string(),
            attempts: MAX_ALLOCATION_ATTEMPTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_container::{MemoryBackend, NetworkRace};
    use pkg_constants::labels::LABEL_ORIGIN;

    fn net(name: &str, cidr: &str) -> NetworkInfo {
        NetworkInfo {
            id: name.to_string(),
            name: name.to_string(),
            subnet: Some(cidr.parse().unwrap()),
            labels: Labels::new(),
        }
    }

    #[test]
    fn test_next_after_three_blocks() {
        let nets = vec![
            net("a", "172.33.1.0/24"),
            net("b", "172.33.2.0/24"),
            net("c", "172.33.3.0/24"),
        ];
        let next = next_subnet(&nets).unwrap();
        assert_eq!(next.to_string(), "172.33.4.0/24");
        assert_eq!(next.gateway(), Ipv4Addr::new(172, 33, 4, 1));
    }

    #[test]
    fn test_empty_range_starts_at_first_block() {
        let nets = vec![net("bridge", "172.17.0.0/16"), net("lan", "10.0.0.0/8")];
        assert_eq!(next_subnet(&nets).unwrap().to_string(), "172.33.0.0/24");
    }

    #[test]
    fn test_listing_order_does_not_matter() {
        let forward = vec![net("a", "172.33.9.0/24"), net("b", "172.33.2.0/24")];
        let reverse = vec![net("b", "172.33.2.0/24"), net("a", "172.33.9.0/24")];
        assert_eq!(next_subnet(&forward).unwrap(), next_subnet(&reverse).unwrap());
        assert_eq!(next_subnet(&forward).unwrap().to_string(), "172.33.10.0/24");
    }

    #[test]
    fn test_rolls_into_next_second_octet() {
        let nets = vec![net("a", "172.33.255.0/24")];
        assert_eq!(next_subnet(&nets).unwrap().to_string(), "172.34.0.0/24");
    }

    #[test]
    fn test_wide_external_network_is_skipped() {
        let nets = vec![net("a", "172.33.1.0/24"), net("ext", "172.40.0.0/16")];
        assert_eq!(next_subnet(&nets).unwrap().to_string(), "172.41.0.0/24");
    }

    #[test]
    fn test_small_block_rounds_up() {
        let nets = vec![net("a", "172.33.5.16/28")];
        assert_eq!(next_subnet(&nets).unwrap().to_string(), "172.33.6.0/24");
    }

    #[test]
    fn test_exhausted() {
        let nets = vec![net("last", "172.255.255.0/24")];
        assert!(matches!(
            next_subnet(&nets),
            Err(AllocationError::AddressSpaceExhausted { .. })
        ));
    }

    #[test]
    fn test_never_overlaps_existing() {
        let mut nets = vec![net("ext", "172.33.0.0/22")];
        for i in 0..20 {
            let next = next_subnet(&nets).unwrap();
            assert!(nets.iter().all(|n| !n.subnet.unwrap().overlaps(&next)));
            nets.push(net(&format!("n{}", i), &next.to_string()));
        }
    }

    #[tokio::test]
    async fn test_allocate_is_idempotent() {
        let backend = Arc::new(MemoryBackend::local());
        backend.add_network("bridge", Some("172.17.0.0/16"), Labels::new()).await;
        let allocator = SubnetAllocator::new(backend.clone(), "nbhub");

        let first = allocator.allocate_or_get("nbhub-alice", &Labels::new()).await.unwrap();
        assert_eq!(first.subnet.unwrap().to_string(), "172.33.0.0/24");

        let again = allocator.allocate_or_get("NBHUB-ALICE", &Labels::new()).await.unwrap();
        assert_eq!(again.subnet, first.subnet);
        assert_eq!(again.id, first.id);

        let created = backend.network("nbhub-alice").await.unwrap();
        assert_eq!(created.labels.get(LABEL_ORIGIN).unwrap(), "nbhub");
    }

    #[tokio::test]
    async fn test_second_user_gets_next_block() {
        let backend = Arc::new(MemoryBackend::local());
        let allocator = SubnetAllocator::new(backend.clone(), "nbhub");
        let a = allocator.allocate_or_get("nbhub-alice", &Labels::new()).await.unwrap();
        let b = allocator.allocate_or_get("nbhub-bob", &Labels::new()).await.unwrap();
        assert!(!a.subnet.unwrap().overlaps(&b.subnet.unwrap()));
        assert_eq!(b.subnet.unwrap().to_string(), "172.33.1.0/24");
    }

    #[tokio::test]
    async fn test_name_race_returns_winner() {
        let backend = Arc::new(MemoryBackend::local());
        let theirs: Subnet = "172.33.7.0/24".parse().unwrap();
        backend.arm_network_race(NetworkRace::NameTaken(theirs)).await;
        let allocator = SubnetAllocator::new(backend.clone(), "nbhub");
        let handle = allocator.allocate_or_get("nbhub-alice", &Labels::new()).await.unwrap();
        assert_eq!(handle.subnet, Some(theirs));
    }

    #[tokio::test]
    async fn test_pool_race_retries_with_next_block() {
        let backend = Arc::new(MemoryBackend::local());
        backend.arm_network_race(NetworkRace::PoolTaken).await;
        let allocator = SubnetAllocator::new(backend.clone(), "nbhub");
        let handle = allocator.allocate_or_get("nbhub-alice", &Labels::new()).await.unwrap();
        assert_eq!(handle.subnet.unwrap().to_string(), "172.33.1.0/24");
    }

    #[tokio::test]
    async fn test_unsupported_backend_fails() {
        let backend = Arc::new(MemoryBackend::cluster());
        let allocator = SubnetAllocator::new(backend, "nbhub");
        let err = allocator
            .allocate_or_get("nbhub-alice", &Labels::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AllocationError::Backend(BackendError::Unsupported { .. })
        ));
    }
}
