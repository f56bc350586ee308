//! Well-known metric names, label keys and resource types

/// Label keys attached to metric sets
pub mod labels {
    pub const TYPE: &str = "type";
    pub const NAMESPACE_NAME: &str = "namespace_name";
    pub const NAMESPACE_ID: &str = "namespace_id";
    pub const POD_NAME: &str = "pod_name";
    pub const POD_ID: &str = "pod_id";
    pub const CONTAINER_NAME: &str = "container_name";
    pub const NODENAME: &str = "nodename";
    pub const HOSTNAME: &str = "hostname";
    pub const HOST_ID: &str = "host_id";
    pub const RESOURCE_ID: &str = "resource_id";
    pub const CLUSTER: &str = "cluster";
    pub const LABELS: &str = "labels";
    pub const PHASE: &str = "phase";
    pub const STATE: &str = "state";

    /// Labels copied from a container onto the pod set synthesized for it
    pub const POD_IDENTITY: &[&str] = &[
        POD_ID,
        POD_NAME,
        NAMESPACE_NAME,
        NAMESPACE_ID,
        NODENAME,
        HOSTNAME,
        HOST_ID,
    ];
}

/// Values of the `type` label
pub mod types {
    pub const POD_CONTAINER: &str = "pod_container";
    pub const POD: &str = "pod";
    pub const NAMESPACE: &str = "ns";
    pub const NODE: &str = "node";
    pub const SYS_CONTAINER: &str = "sys_container";
    pub const CLUSTER: &str = "cluster";
}

pub const CPU_USAGE: &str = "cpu/usage";
pub const CPU_USAGE_RATE: &str = "cpu/usage_rate";
pub const CPU_REQUEST: &str = "cpu/request";
pub const CPU_LIMIT: &str = "cpu/limit";

pub const MEMORY_USAGE: &str = "memory/usage";
pub const MEMORY_WORKING_SET: &str = "memory/working_set";
pub const MEMORY_REQUEST: &str = "memory/request";
pub const MEMORY_LIMIT: &str = "memory/limit";
pub const MEMORY_PAGE_FAULTS: &str = "memory/page_faults";
pub const MEMORY_PAGE_FAULTS_RATE: &str = "memory/page_faults_rate";
pub const MEMORY_MAJOR_PAGE_FAULTS: &str = "memory/major_page_faults";
pub const MEMORY_MAJOR_PAGE_FAULTS_RATE: &str = "memory/major_page_faults_rate";

pub const NETWORK_RX: &str = "network/rx";
pub const NETWORK_RX_RATE: &str = "network/rx_rate";
pub const NETWORK_RX_ERRORS: &str = "network/rx_errors";
pub const NETWORK_RX_ERRORS_RATE: &str = "network/rx_errors_rate";
pub const NETWORK_TX: &str = "network/tx";
pub const NETWORK_TX_RATE: &str = "network/tx_rate";
pub const NETWORK_TX_ERRORS: &str = "network/tx_errors";
pub const NETWORK_TX_ERRORS_RATE: &str = "network/tx_errors_rate";

pub const DISK_IO_READ_BYTES: &str = "disk/io_read_bytes";
pub const DISK_IO_READ_BYTES_RATE: &str = "disk/io_read_bytes_rate";
pub const DISK_IO_WRITE_BYTES: &str = "disk/io_write_bytes";
pub const DISK_IO_WRITE_BYTES_RATE: &str = "disk/io_write_bytes_rate";

pub const EPHEMERAL_STORAGE_REQUEST: &str = "ephemeral_storage/request";
pub const EPHEMERAL_STORAGE_LIMIT: &str = "ephemeral_storage/limit";

pub const POD_COUNT: &str = "pod/count";
pub const POD_CONTAINER_COUNT: &str = "pod_container/count";
pub const POD_PHASE: &str = "pod/phase";
pub const POD_CONTAINER_STATUS: &str = "pod_container/status";

pub const UPTIME: &str = "uptime";
pub const RESTART_COUNT: &str = "restart_count";
pub const FILESYSTEM_USAGE: &str = "filesystem/usage";

/// Default sums for namespace and cluster roll-ups
pub const NAMESPACE_SUM_METRICS: &[&str] = &[
    CPU_USAGE_RATE,
    MEMORY_USAGE,
    CPU_REQUEST,
    CPU_LIMIT,
    MEMORY_REQUEST,
    MEMORY_LIMIT,
];

/// Default sums for node roll-ups
pub const NODE_SUM_METRICS: &[&str] = &[
    CPU_REQUEST,
    CPU_LIMIT,
    MEMORY_REQUEST,
    MEMORY_LIMIT,
    EPHEMERAL_STORAGE_REQUEST,
    EPHEMERAL_STORAGE_LIMIT,
];

/// Cumulative and delta metrics that the pod aggregator must not sum
pub const POD_AGGREGATION_SKIP: &[&str] = &[
    CPU_USAGE,
    MEMORY_PAGE_FAULTS,
    MEMORY_MAJOR_PAGE_FAULTS,
    NETWORK_RX,
    NETWORK_RX_ERRORS,
    NETWORK_TX,
    NETWORK_TX_ERRORS,
    UPTIME,
    RESTART_COUNT,
];
