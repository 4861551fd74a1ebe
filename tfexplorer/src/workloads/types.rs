use crate::capacity::units::ResourceUnits;
use crate::crypto;
use crate::{ExplorerError, ExplorerErrorKind, ExplorerResult, Id};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// The lifecycle state of a reservation or workload, i.e. the next action to take for it.
#[repr(i64)]
#[derive(Debug, Serialize_repr, Deserialize_repr, PartialEq, Eq, Clone, Copy)]
pub enum NextAction {
    /// Freshly created.
    Create,
    /// Waiting for provisioning signatures.
    Sign,
    /// Waiting for payment.
    Pay,
    /// Ready to be deployed, or deployed.
    Deploy,
    /// Marked for deletion.
    Delete,
    /// Rejected.
    Invalid,
    /// Deleted from the node.
    Deleted,
    /// Moved to a newer format.
    Migrated,
}

/// The set of users which can sign a request, and how many distinct signatures are needed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SigningRequest {
    /// Users allowed to sign.
    #[serde(default)]
    pub signers: Vec<Id>,
    /// Minimum amount of distinct signers.
    pub quorum_min: i64,
}

/// A signature of a user on a signing request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SigningSignature {
    /// The user which signed.
    pub tid: Id,
    /// Hex encoded signature.
    pub signature: String,
    /// Unix timestamp of the signature.
    pub epoch: i64,
}

impl SigningRequest {
    /// Count the distinct signers of `signatures` which are allowed to sign this request.
    pub fn count_signatures(&self, signatures: &[SigningSignature]) -> usize {
        let mut counted: Vec<Id> = Vec::with_capacity(signatures.len());
        for sig in signatures {
            if self.signers.contains(&sig.tid) && !counted.contains(&sig.tid) {
                counted.push(sig.tid);
            }
        }
        counted.len()
    }

    /// Provisioning quorum. A request without a minimum is always satisfied.
    pub fn provision_quorum_met(&self, signatures: &[SigningSignature]) -> bool {
        self.quorum_min <= 0 || self.count_signatures(signatures) as i64 >= self.quorum_min
    }

    /// Deletion quorum. A request without a minimum can never be satisfied.
    pub fn delete_quorum_met(&self, signatures: &[SigningSignature]) -> bool {
        self.quorum_min > 0 && self.count_signatures(signatures) as i64 >= self.quorum_min
    }

    /// Verify and record a signature on this request. The signer must be part of the request
    /// and can only sign once.
    pub(crate) fn admit(
        &self,
        signatures: &mut Vec<SigningSignature>,
        message: &[u8],
        signature: SigningSignature,
        pubkey_hex: &str,
    ) -> ExplorerResult<()> {
        if !self.signers.contains(&signature.tid) {
            return Err(ExplorerError::with_message(
                ExplorerErrorKind::Unauthorized,
                format!("user {} is not allowed to sign", signature.tid),
            ));
        }
        if signatures.iter().any(|s| s.tid == signature.tid) {
            return Err(ExplorerError::with_message(
                ExplorerErrorKind::Conflict,
                format!("user {} already signed", signature.tid),
            ));
        }
        crypto::verify_hex(pubkey_hex, message, &signature.signature)?;
        signatures.push(signature);
        Ok(())
    }
}

/// Outcome of a deployment as reported by a node.
#[repr(i64)]
#[derive(Serialize_repr, Deserialize_repr, PartialEq, Eq, Debug, Clone, Copy)]
pub enum ResultState {
    /// Deployment failed.
    Error,
    /// Deployment succeeded.
    Ok,
    /// The workload was removed.
    Deleted,
}

/// A result reported by a node for a deployment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkloadResult {
    /// Id of the workload the result is for.
    pub workload_id: String,
    /// Outcome.
    pub state: ResultState,
    /// Error message, if any.
    #[serde(default)]
    pub message: String,
    /// Workload specific data.
    #[serde(default)]
    pub data_json: serde_json::Value,
    /// Signature of the node on the result.
    #[serde(default)]
    pub signature: String,
    /// Unix timestamp of the result.
    pub epoch: i64,
    /// Node which deployed the workload.
    pub node_id: String,
}

/// Type tag of a workload.
#[repr(i64)]
#[derive(Debug, Serialize_repr, Deserialize_repr, PartialEq, Eq, Clone, Copy)]
pub enum WorkloadType {
    /// A 0-db namespace.
    Zdb,
    /// A container.
    Container,
    /// A volume.
    Volume,
    /// A legacy network.
    Network,
    /// A kubernetes vm.
    Kubernetes,
    /// A TCP proxy on a gateway.
    Proxy,
    /// A reverse TCP proxy on a gateway.
    ReverseProxy,
    /// A subdomain on a gateway.
    Subdomain,
    /// A delegated domain on a gateway.
    DomainDelegate,
    /// A 4to6 gateway.
    Gateway4To6,
    /// A network resource on a node.
    NetworkResource,
    /// A public ipv4 address.
    PublicIp,
}

impl fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            WorkloadType::Zdb => "ZDB",
            WorkloadType::Container => "CONTAINER",
            WorkloadType::Volume => "VOLUME",
            WorkloadType::Network => "NETWORK",
            WorkloadType::Kubernetes => "KUBERNETES",
            WorkloadType::Proxy => "PROXY",
            WorkloadType::ReverseProxy => "REVERSE-PROXY",
            WorkloadType::Subdomain => "SUBDOMAIN",
            WorkloadType::DomainDelegate => "DOMAIN-DELEGATE",
            WorkloadType::Gateway4To6 => "GATEWAY4TO6",
            WorkloadType::NetworkResource => "NETWORK_RESOURCE",
            WorkloadType::PublicIp => "PUBLIC_IP",
        })
    }
}

/// Disk kind of storage workloads.
#[repr(u8)]
#[derive(Debug, Serialize_repr, Deserialize_repr, PartialEq, Eq, Clone, Copy)]
pub enum DiskType {
    /// Spinning disk.
    Hdd,
    /// Solid state disk.
    Ssd,
}

impl fmt::Display for DiskType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            DiskType::Hdd => "hdd",
            DiskType::Ssd => "ssd",
        })
    }
}

/// Mode of a 0-db namespace.
#[repr(u8)]
#[derive(Debug, Serialize_repr, Deserialize_repr, PartialEq, Eq, Clone, Copy)]
pub enum ZdbMode {
    /// Sequential mode.
    Seq,
    /// User key mode.
    User,
}

impl fmt::Display for ZdbMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ZdbMode::Seq => "seq",
            ZdbMode::User => "user",
        })
    }
}

/// Resources reserved for a container.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContainerCapacity {
    /// Virtual cores.
    pub cpu: u64,
    /// Memory in MiB.
    pub memory: u64,
    /// Root disk kind.
    pub disk_type: DiskType,
    /// Root disk size in MiB.
    pub disk_size: u64,
}

/// A volume mounted in a container.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContainerMount {
    /// Id of the volume workload.
    pub volume_id: String,
    /// Mount point in the container.
    pub mountpoint: String,
}

/// A network a container is connected to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NetworkConnection {
    /// Name of the network.
    pub network_id: String,
    /// Address of the container in the network.
    pub ipaddress: IpAddr,
    /// Whether the container gets a public ipv6 address.
    #[serde(default)]
    pub public_ip6: bool,
}

/// A container deployment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContainerData {
    /// Flist to boot.
    pub flist: String,
    /// Hub the flist is stored on.
    pub hub_url: String,
    /// Environment variables.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Encrypted environment variables.
    #[serde(default)]
    pub secret_environment: BTreeMap<String, String>,
    /// Command to run.
    pub entrypoint: String,
    /// Whether to start the interactive shell instead of the entrypoint.
    pub interactive: bool,
    /// Mounted volumes.
    #[serde(default)]
    pub volumes: Vec<ContainerMount>,
    /// Network connections.
    #[serde(default)]
    pub network_connections: Vec<NetworkConnection>,
    /// Reserved resources.
    pub capacity: ContainerCapacity,
}

/// A volume deployment. Size is in GiB.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VolumeData {
    /// Size.
    pub size: u64,
    /// Disk kind.
    pub disk_type: DiskType,
}

/// A 0-db namespace deployment. Size is in GiB.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ZdbData {
    /// Size.
    pub size: u64,
    /// Namespace mode.
    pub mode: ZdbMode,
    /// Namespace password.
    pub password: String,
    /// Disk kind.
    pub disk_type: DiskType,
    /// Whether the namespace is publicly readable.
    pub public: bool,
}

/// A kubernetes vm deployment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KubernetesData {
    /// Predefined vm size.
    pub size: u64,
    /// Cluster secret.
    pub cluster_secret: String,
    /// Network the vm is connected to.
    pub network_id: String,
    /// Address of the vm in the network.
    pub ipaddress: IpAddr,
    /// Master nodes of the cluster, empty for a master.
    #[serde(default)]
    pub master_ips: Vec<IpAddr>,
    /// Ssh keys allowed to log in.
    #[serde(default)]
    pub ssh_keys: Vec<String>,
    /// Id of a public ip workload attached to the vm, 0 if none.
    #[serde(default)]
    pub public_ip: Id,
}

/// A public ip reservation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PublicIpData {
    /// The reserved address.
    pub ipaddress: String,
}

/// A network resource on a node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NetworkResourceData {
    /// Name of the network.
    pub name: String,
    /// Range of the whole network.
    pub network_iprange: String,
    /// Range of this node in the network.
    pub iprange: String,
    /// Encrypted wireguard private key.
    pub wireguard_private_key_encrypted: String,
    /// Wireguard public key.
    pub wireguard_public_key: String,
    /// Wireguard listen port.
    pub wireguard_listen_port: u16,
}

/// A TCP proxy on a gateway.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GatewayProxyData {
    /// Domain to proxy.
    pub domain: String,
    /// Backend address.
    pub addr: String,
    /// Backend port.
    pub port: u32,
    /// Backend TLS port.
    pub port_tls: u32,
}

/// A reverse TCP proxy on a gateway.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GatewayReverseProxyData {
    /// Domain to proxy.
    pub domain: String,
    /// Secret of the tunnel client.
    pub secret: String,
}

/// A subdomain on a gateway.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GatewaySubdomainData {
    /// The subdomain.
    pub domain: String,
    /// Addresses the subdomain resolves to.
    pub ips: Vec<String>,
}

/// A domain delegated to a gateway.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GatewayDelegateData {
    /// The delegated domain.
    pub domain: String,
}

/// A 4to6 gateway.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Gateway4To6Data {
    /// Wireguard public key of the client.
    pub public_key: String,
}

/// The type specific part of a workload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "workload_type", content = "data", rename_all = "snake_case")]
pub enum WorkloadData {
    /// A container.
    Container(ContainerData),
    /// A volume.
    Volume(VolumeData),
    /// A 0-db namespace.
    Zdb(ZdbData),
    /// A kubernetes vm.
    Kubernetes(KubernetesData),
    /// A public ip.
    PublicIp(PublicIpData),
    /// A network resource.
    NetworkResource(NetworkResourceData),
    /// A gateway proxy.
    GatewayProxy(GatewayProxyData),
    /// A gateway reverse proxy.
    GatewayReverseProxy(GatewayReverseProxyData),
    /// A gateway subdomain.
    GatewaySubdomain(GatewaySubdomainData),
    /// A gateway delegated domain.
    GatewayDelegate(GatewayDelegateData),
    /// A 4to6 gateway.
    Gateway4To6(Gateway4To6Data),
}

fn round4(v: f64) -> f64 {
    (v * 10_000.).round() / 10_000.
}

fn storage(units: &mut ResourceUnits, disk_type: DiskType, size: f64) {
    match disk_type {
        DiskType::Hdd => units.hru += size,
        DiskType::Ssd => units.sru += size,
    }
}

impl WorkloadData {
    /// The type tag of the payload.
    pub fn workload_type(&self) -> WorkloadType {
        match self {
            WorkloadData::Container(_) => WorkloadType::Container,
            WorkloadData::Volume(_) => WorkloadType::Volume,
            WorkloadData::Zdb(_) => WorkloadType::Zdb,
            WorkloadData::Kubernetes(_) => WorkloadType::Kubernetes,
            WorkloadData::PublicIp(_) => WorkloadType::PublicIp,
            WorkloadData::NetworkResource(_) => WorkloadType::NetworkResource,
            WorkloadData::GatewayProxy(_) => WorkloadType::Proxy,
            WorkloadData::GatewayReverseProxy(_) => WorkloadType::ReverseProxy,
            WorkloadData::GatewaySubdomain(_) => WorkloadType::Subdomain,
            WorkloadData::GatewayDelegate(_) => WorkloadType::DomainDelegate,
            WorkloadData::Gateway4To6(_) => WorkloadType::Gateway4To6,
        }
    }

    /// Resources consumed by the workload while it is deployed. Memory and disk are in GB.
    pub fn resource_units(&self) -> ResourceUnits {
        let mut units = ResourceUnits::default();
        match self {
            WorkloadData::Container(c) => {
                units.cru = c.capacity.cpu as f64;
                units.mru = round4(c.capacity.memory as f64 / 1024.);
                storage(
                    &mut units,
                    c.capacity.disk_type,
                    round4(c.capacity.disk_size as f64 / 1024.),
                );
            }
            WorkloadData::Volume(v) => storage(&mut units, v.disk_type, v.size as f64),
            WorkloadData::Zdb(z) => storage(&mut units, z.disk_type, z.size as f64),
            WorkloadData::Kubernetes(k) => match k.size {
                1 => {
                    units.cru = 1.;
                    units.mru = 2.;
                    units.sru = 50.;
                }
                2 => {
                    units.cru = 2.;
                    units.mru = 4.;
                    units.sru = 100.;
                }
                _ => {}
            },
            WorkloadData::PublicIp(_) => units.ipv4u = 1.,
            WorkloadData::NetworkResource(_)
            | WorkloadData::GatewayProxy(_)
            | WorkloadData::GatewayReverseProxy(_)
            | WorkloadData::GatewaySubdomain(_)
            | WorkloadData::GatewayDelegate(_)
            | WorkloadData::Gateway4To6(_) => {}
        }
        units
    }

    /// The type specific part of the challenge signed by users.
    pub fn signature_challenge(&self) -> String {
        let mut c = String::new();
        match self {
            WorkloadData::Container(d) => {
                c.push_str(&d.flist);
                c.push_str(&d.hub_url);
                c.push_str(&d.entrypoint);
                c.push_str(&d.interactive.to_string());
                for (k, v) in &d.environment {
                    c.push_str(&format!("{}={}", k, v));
                }
                for (k, v) in &d.secret_environment {
                    c.push_str(&format!("{}={}", k, v));
                }
                for v in &d.volumes {
                    c.push_str(&v.volume_id);
                    c.push_str(&v.mountpoint);
                }
                for n in &d.network_connections {
                    c.push_str(&n.network_id);
                    c.push_str(&n.ipaddress.to_string());
                    c.push_str(&n.public_ip6.to_string());
                }
                c.push_str(&format!(
                    "{}{}{}{}",
                    d.capacity.cpu, d.capacity.memory, d.capacity.disk_size, d.capacity.disk_type
                ));
            }
            WorkloadData::Volume(d) => c.push_str(&format!("{}{}", d.size, d.disk_type)),
            WorkloadData::Zdb(d) => c.push_str(&format!(
                "{}{}{}{}{}",
                d.size, d.mode, d.password, d.disk_type, d.public
            )),
            WorkloadData::Kubernetes(d) => {
                c.push_str(&format!(
                    "{}{}{}{}",
                    d.size, d.cluster_secret, d.network_id, d.ipaddress
                ));
                for ip in &d.master_ips {
                    c.push_str(&ip.to_string());
                }
                for key in &d.ssh_keys {
                    c.push_str(key);
                }
                c.push_str(&d.public_ip.to_string());
            }
            WorkloadData::PublicIp(d) => c.push_str(&d.ipaddress),
            WorkloadData::NetworkResource(d) => c.push_str(&format!(
                "{}{}{}{}{}{}",
                d.name,
                d.network_iprange,
                d.iprange,
                d.wireguard_private_key_encrypted,
                d.wireguard_public_key,
                d.wireguard_listen_port
            )),
            WorkloadData::GatewayProxy(d) => c.push_str(&format!(
                "{}{}{}{}",
                d.domain, d.addr, d.port, d.port_tls
            )),
            WorkloadData::GatewayReverseProxy(d) => {
                c.push_str(&format!("{}{}", d.domain, d.secret))
            }
            WorkloadData::GatewaySubdomain(d) => {
                c.push_str(&d.domain);
                for ip in &d.ips {
                    c.push_str(ip);
                }
            }
            WorkloadData::GatewayDelegate(d) => c.push_str(&d.domain),
            WorkloadData::Gateway4To6(d) => c.push_str(&d.public_key),
        }
        c
    }
}

/// The immutable part of a workload, fixed at creation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Contract {
    /// Id of the workload.
    pub id: Id,
    /// Node the workload is deployed on.
    pub node_id: String,
    /// Pool paying for the workload.
    pub pool_id: Id,
    /// Customer owning the workload.
    pub customer_tid: Id,
    /// Free form reference.
    #[serde(default)]
    pub reference: String,
    /// Free form description.
    #[serde(default)]
    pub description: String,
    /// Free form metadata.
    #[serde(default)]
    pub metadata: String,
    /// Unix timestamp of the creation.
    pub epoch: i64,
    /// Who needs to sign before the workload is provisioned.
    #[serde(default)]
    pub signing_request_provision: SigningRequest,
    /// Who needs to sign to delete the workload.
    #[serde(default)]
    pub signing_request_delete: SigningRequest,
}

/// The mutable part of a workload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct State {
    /// Lifecycle state.
    pub next_action: NextAction,
    /// Hex encoded signature of the customer on the challenge.
    #[serde(default)]
    pub customer_signature: String,
    /// Signatures on the provision request.
    #[serde(default)]
    pub signatures_provision: Vec<SigningSignature>,
    /// Signatures on the delete request.
    #[serde(default)]
    pub signatures_delete: Vec<SigningSignature>,
    /// Signature of the farmer, if any.
    #[serde(default)]
    pub signature_farmer: Option<SigningSignature>,
    /// Deployment result reported by the node.
    #[serde(default)]
    pub result: Option<WorkloadResult>,
}

impl Default for State {
    fn default() -> Self {
        State {
            next_action: NextAction::Create,
            customer_signature: String::new(),
            signatures_provision: Vec::new(),
            signatures_delete: Vec::new(),
            signature_farmer: None,
            result: None,
        }
    }
}

/// A single deployment on a node, funded by a capacity pool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Workload {
    /// Immutable part.
    pub contract: Contract,
    /// Mutable part.
    pub state: State,
    /// Type specific payload.
    #[serde(flatten)]
    pub data: WorkloadData,
}

impl Workload {
    /// Create a new workload in the `Create` state.
    pub fn new(contract: Contract, data: WorkloadData) -> Self {
        Workload {
            contract,
            state: State::default(),
            data,
        }
    }

    /// The type of the workload.
    pub fn workload_type(&self) -> WorkloadType {
        self.data.workload_type()
    }

    /// Resources used by the workload.
    pub fn resource_units(&self) -> ResourceUnits {
        self.data.resource_units()
    }

    /// The challenge users sign: the contract fields followed by the type specific payload.
    pub fn signature_challenge(&self) -> String {
        let c = &self.contract;
        format!(
            "{}{}{}{}{}{}{}{}{}{}",
            c.id,
            c.node_id,
            c.pool_id,
            c.reference,
            c.customer_tid,
            self.workload_type(),
            c.epoch,
            c.description,
            c.metadata,
            self.data.signature_challenge()
        )
    }

    /// Verify the customer signature on the challenge.
    pub fn verify_customer_signature(&self, pubkey_hex: &str) -> ExplorerResult<()> {
        let hash = crypto::challenge_hash(&self.signature_challenge());
        crypto::verify_hex(pubkey_hex, &hash, &self.state.customer_signature)?;
        Ok(())
    }

    /// Verify and record a provisioning signature.
    pub fn add_provision_signature(
        &mut self,
        signature: SigningSignature,
        pubkey_hex: &str,
    ) -> ExplorerResult<()> {
        let hash = crypto::challenge_hash(&self.signature_challenge());
        self.contract.signing_request_provision.admit(
            &mut self.state.signatures_provision,
            &hash,
            signature,
            pubkey_hex,
        )
    }

    /// Verify and record a deletion signature.
    pub fn add_delete_signature(
        &mut self,
        signature: SigningSignature,
        pubkey_hex: &str,
    ) -> ExplorerResult<()> {
        let hash = crypto::challenge_hash(&self.signature_challenge());
        self.contract.signing_request_delete.admit(
            &mut self.state.signatures_delete,
            &hash,
            signature,
            pubkey_hex,
        )
    }

    /// Record a result reported by the node. A `Deleted` result finishes the workload.
    /// Returns true if the workload is now deleted, in which case its capacity must be
    /// released from the pool.
    pub fn apply_result(&mut self, result: WorkloadResult) -> bool {
        let deleted = result.state == ResultState::Deleted;
        self.state.result = Some(result);
        if deleted {
            self.state.next_action = NextAction::Deleted;
        }
        deleted
    }

    /// Whether the node reported a successful deployment.
    pub fn is_successfully_deployed(&self) -> bool {
        matches!(&self.state.result, Some(r) if r.state == ResultState::Ok)
    }
}

/// A deployment of multiple workloads at once, with a bounded lifetime.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Reservation {
    /// Id of the reservation.
    pub id: Id,
    /// The signed payload.
    pub json: String,
    /// Customer owning the reservation.
    pub customer_tid: Id,
    /// Hex encoded signature of the customer on `json`.
    pub customer_signature: String,
    /// Lifecycle state.
    pub next_action: NextAction,
    /// Unix timestamp before which all workloads must be deployed.
    pub expiration_provisioning: i64,
    /// Unix timestamp at which the reservation ends.
    pub expiration_reservation: i64,
    /// Who needs to sign before the reservation is provisioned.
    #[serde(default)]
    pub signing_request_provision: SigningRequest,
    /// Who needs to sign to delete the reservation.
    #[serde(default)]
    pub signing_request_delete: SigningRequest,
    /// Signatures on the provision request.
    #[serde(default)]
    pub signatures_provision: Vec<SigningSignature>,
    /// Signatures on the delete request.
    #[serde(default)]
    pub signatures_delete: Vec<SigningSignature>,
    /// The workloads to deploy.
    pub workloads: Vec<WorkloadData>,
    /// Results reported by the nodes.
    #[serde(default)]
    pub results: Vec<WorkloadResult>,
}

impl Reservation {
    /// All workloads are deployed, and every reported result is a success.
    pub fn is_successfully_deployed(&self) -> bool {
        self.results.len() >= self.workloads.len()
            && self.results.iter().all(|r| r.state == ResultState::Ok)
    }

    /// Verify and record a provisioning signature on the payload.
    pub fn add_provision_signature(
        &mut self,
        signature: SigningSignature,
        pubkey_hex: &str,
    ) -> ExplorerResult<()> {
        self.signing_request_provision.admit(
            &mut self.signatures_provision,
            self.json.as_bytes(),
            signature,
            pubkey_hex,
        )
    }

    /// Verify and record a deletion signature on the payload.
    pub fn add_delete_signature(
        &mut self,
        signature: SigningSignature,
        pubkey_hex: &str,
    ) -> ExplorerResult<()> {
        self.signing_request_delete.admit(
            &mut self.signatures_delete,
            self.json.as_bytes(),
            signature,
            pubkey_hex,
        )
    }
}
