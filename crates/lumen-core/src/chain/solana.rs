//! Solana RPC method tables, node capability tiers, and upstream error codes.
//!
//! Both supported chains (Solana mainnet and Eclipse) speak the Solana RPC
//! surface, so they share these tables. Method costs are opaque units passed
//! through to the host's accounting.

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const CHAIN_NAME: &str = "solana";
pub const ECLIPSE_CHAIN_NAME: &str = "eclipse";

// https://docs.solana.com/api/http
pub const GET_ACCOUNT_INFO: &str = "getAccountInfo";
pub const SEND_TRANSACTION: &str = "sendTransaction";
pub const GET_SIGNATURES_FOR_ADDRESS: &str = "getSignaturesForAddress";
pub const GET_LATEST_BLOCKHASH: &str = "getLatestBlockhash";
pub const GET_SLOT: &str = "getSlot";
pub const GET_TRANSACTION: &str = "getTransaction";
pub const GET_INFLATION_REWARD: &str = "getInflationReward";
pub const GET_PROGRAM_ACCOUNTS: &str = "getProgramAccounts";
pub const GET_SIGNATURE_STATUSES: &str = "getSignatureStatuses";
pub const GET_TOKEN_ACCOUNT_BALANCE: &str = "getTokenAccountBalance";
pub const GET_MULTIPLE_ACCOUNTS: &str = "getMultipleAccounts";
pub const GET_EPOCH_INFO: &str = "getEpochInfo";
pub const GET_BALANCE: &str = "getBalance";
pub const GET_RECENT_PERFORMANCE_SAMPLES: &str = "getRecentPerformanceSamples";
pub const GET_VOTE_ACCOUNTS: &str = "getVoteAccounts";
pub const GET_INFLATION_RATE: &str = "getInflationRate";
pub const GET_SUPPLY: &str = "getSupply";
pub const GET_BLOCK_TIME: &str = "getBlockTime";
pub const GET_BLOCK_HEIGHT: &str = "getBlockHeight";
pub const GET_MINIMUM_BALANCE_FOR_RENT_EXEMPTION: &str = "getMinimumBalanceForRentExemption";
pub const IS_BLOCKHASH_VALID: &str = "isBlockhashValid";
pub const GET_TRANSACTION_COUNT: &str = "getTransactionCount";
pub const GET_TOKEN_ACCOUNTS_BY_OWNER: &str = "getTokenAccountsByOwner";
pub const GET_BLOCK: &str = "getBlock";
pub const GET_BLOCKS: &str = "getBlocks";
pub const GET_BLOCKS_WITH_LIMIT: &str = "getBlocksWithLimit";
pub const GET_VERSION: &str = "getVersion";
pub const GET_TOKEN_LARGEST_ACCOUNTS: &str = "getTokenLargestAccounts";
pub const GET_BLOCK_COMMITMENT: &str = "getBlockCommitment";
pub const GET_STAKE_ACTIVATION: &str = "getStakeActivation";
pub const GET_TOKEN_ACCOUNTS_BY_DELEGATE: &str = "getTokenAccountsByDelegate";
pub const GET_TOKEN_SUPPLY: &str = "getTokenSupply";
pub const GET_LEADER_SCHEDULE: &str = "getLeaderSchedule";
pub const GET_FIRST_AVAILABLE_BLOCK: &str = "getFirstAvailableBlock";
pub const GET_IDENTITY: &str = "getIdentity";
pub const GET_BLOCK_PRODUCTION: &str = "getBlockProduction";
pub const GET_CLUSTER_NODES: &str = "getClusterNodes";
pub const GET_EPOCH_SCHEDULE: &str = "getEpochSchedule";
pub const GET_FEE_FOR_MESSAGE: &str = "getFeeForMessage";
pub const GET_GENESIS_HASH: &str = "getGenesisHash";
pub const GET_HEALTH: &str = "getHealth";
pub const GET_HIGHEST_SNAPSHOT_SLOT: &str = "getHighestSnapshotSlot";
pub const GET_INFLATION_GOVERNOR: &str = "getInflationGovernor";
pub const GET_LARGEST_ACCOUNTS: &str = "getLargestAccounts";
pub const GET_MAX_RETRANSMIT_SLOT: &str = "getMaxRetransmitSlot";
pub const GET_MAX_SHRED_INSERT_SLOT: &str = "getMaxShredInsertSlot";
pub const GET_RECENT_PRIORITIZATION_FEES: &str = "getRecentPrioritizationFees";
pub const GET_SLOT_LEADER: &str = "getSlotLeader";
pub const GET_SLOT_LEADERS: &str = "getSlotLeaders";
pub const GET_STAKE_MINIMUM_DELEGATION: &str = "getStakeMinimumDelegation";
pub const MINIMUM_LEDGER_SLOT: &str = "minimumLedgerSlot";
pub const REQUEST_AIRDROP: &str = "requestAirdrop";
pub const SIMULATE_TRANSACTION: &str = "simulateTransaction";

// Deprecated methods that still work on mainnet.
pub const GET_CONFIRMED_BLOCK: &str = "getConfirmedBlock";
pub const GET_CONFIRMED_BLOCKS: &str = "getConfirmedBlocks";
pub const GET_CONFIRMED_BLOCKS_WITH_LIMIT: &str = "getConfirmedBlocksWithLimit";
pub const GET_CONFIRMED_SIGNATURES_FOR_ADDRESS2: &str = "getConfirmedSignaturesForAddress2";
pub const GET_CONFIRMED_TRANSACTION: &str = "getConfirmedTransaction";
pub const GET_FEE_CALCULATOR_FOR_BLOCKHASH: &str = "getFeeCalculatorForBlockhash";
pub const GET_FEE_RATE_GOVERNOR: &str = "getFeeRateGovernor";
pub const GET_FEES: &str = "getFees";
pub const GET_RECENT_BLOCKHASH: &str = "getRecentBlockhash";
pub const GET_SNAPSHOT_SLOT: &str = "getSnapshotSlot";

/// Methods answerable by every node tier.
const ACCOUNT_TIER_METHODS: &[&str] = &[
    GET_ACCOUNT_INFO,
    GET_BALANCE,
    GET_CLUSTER_NODES,
    GET_EPOCH_INFO,
    GET_EPOCH_SCHEDULE,
    GET_FEE_FOR_MESSAGE,
    GET_GENESIS_HASH,
    GET_HEALTH,
    GET_HIGHEST_SNAPSHOT_SLOT,
    GET_IDENTITY,
    GET_INFLATION_GOVERNOR,
    GET_INFLATION_RATE,
    GET_INFLATION_REWARD,
    GET_LARGEST_ACCOUNTS,
    GET_LATEST_BLOCKHASH,
    GET_MAX_RETRANSMIT_SLOT,
    GET_MAX_SHRED_INSERT_SLOT,
    GET_MINIMUM_BALANCE_FOR_RENT_EXEMPTION,
    GET_MULTIPLE_ACCOUNTS,
    GET_RECENT_PERFORMANCE_SAMPLES,
    GET_RECENT_PRIORITIZATION_FEES,
    GET_SLOT,
    GET_SLOT_LEADER,
    GET_SLOT_LEADERS,
    GET_STAKE_ACTIVATION,
    GET_STAKE_MINIMUM_DELEGATION,
    GET_TOKEN_ACCOUNT_BALANCE,
    GET_TOKEN_ACCOUNTS_BY_DELEGATE,
    GET_TOKEN_ACCOUNTS_BY_OWNER,
    GET_TOKEN_LARGEST_ACCOUNTS,
    GET_VERSION,
    GET_VOTE_ACCOUNTS,
    MINIMUM_LEDGER_SLOT,
    REQUEST_AIRDROP,
    SEND_TRANSACTION,
    SIMULATE_TRANSACTION,
    GET_FEE_CALCULATOR_FOR_BLOCKHASH,
    GET_FEE_RATE_GOVERNOR,
    GET_RECENT_BLOCKHASH,
    GET_FEES,
    GET_SNAPSHOT_SLOT,
];

/// Methods that require ledger history, answerable by extended and archive
/// tiers only.
const HISTORY_TIER_METHODS: &[&str] = &[
    GET_BLOCK,
    GET_BLOCK_HEIGHT,
    GET_BLOCK_PRODUCTION,
    GET_BLOCK_COMMITMENT,
    GET_BLOCKS,
    GET_BLOCKS_WITH_LIMIT,
    GET_BLOCK_TIME,
    GET_FIRST_AVAILABLE_BLOCK,
    GET_PROGRAM_ACCOUNTS,
    GET_SIGNATURES_FOR_ADDRESS,
    GET_SIGNATURE_STATUSES,
    GET_SUPPLY,
    GET_TOKEN_SUPPLY,
    GET_TRANSACTION,
    GET_TRANSACTION_COUNT,
    GET_CONFIRMED_BLOCK,
    GET_CONFIRMED_BLOCKS,
    GET_CONFIRMED_BLOCKS_WITH_LIMIT,
    GET_CONFIRMED_SIGNATURES_FOR_ADDRESS2,
    GET_CONFIRMED_TRANSACTION,
    GET_LEADER_SCHEDULE,
];

/// DAS (digital asset standard) methods served by dedicated API nodes.
pub const DAS_METHODS: &[&str] = &[
    "getAsset",
    "getAssetBatch",
    "getAssetProof",
    "getAssetProofBatch",
    "getAssetsByOwner",
    "getAssetsByAuthority",
    "getAssetsByCreator",
    "getAssetsByGroup",
    "getGrouping",
    "searchAssets",
    "getTokenAccounts",
    "getSignaturesForAsset",
    "getSignaturesForAssetV2",
    "getAssets",
    "get_assets",
    "getAssetProofs",
    "get_asset_proofs",
    "getAssetSignatures",
    "get_asset_signatures",
    "getAssetSignaturesV2",
    "get_asset_signatures_v2",
];

const DEFAULT_METHOD_COST: u32 = 3;

static DAS_METHOD_SET: LazyLock<AHashSet<&'static str>> =
    LazyLock::new(|| DAS_METHODS.iter().copied().collect());

/// Unit cost per method, passed through to usage accounting. Every RPC and
/// DAS method currently costs the same.
pub static METHOD_COSTS: LazyLock<AHashMap<&'static str, u32>> = LazyLock::new(|| {
    ACCOUNT_TIER_METHODS
        .iter()
        .chain(HISTORY_TIER_METHODS)
        .chain(DAS_METHODS)
        .map(|m| (*m, DEFAULT_METHOD_COST))
        .collect()
});

static ACCOUNT_TIER_SET: LazyLock<AHashSet<&'static str>> =
    LazyLock::new(|| ACCOUNT_TIER_METHODS.iter().copied().collect());

static HISTORY_TIER_SET: LazyLock<AHashSet<&'static str>> =
    LazyLock::new(|| HISTORY_TIER_METHODS.iter().copied().collect());

/// Whether `method` is a known RPC or DAS method on this chain family.
#[must_use]
pub fn is_known_method(method: &str) -> bool {
    METHOD_COSTS.contains_key(method)
}

#[must_use]
pub fn is_das_method(method: &str) -> bool {
    DAS_METHOD_SET.contains(method)
}

/// Methods whose first parameter addresses a historical block, gated by the
/// archive-age window on non-archive nodes.
#[must_use]
pub fn is_block_related(method: &str) -> bool {
    matches!(method, GET_BLOCK | GET_BLOCK_TIME | GET_BLOCK_COMMITMENT | GET_CONFIRMED_BLOCK)
}

/// Methods that read transaction history; non-archive nodes are dispreferred
/// for these under reliable routing.
#[must_use]
pub fn is_tx_related(method: &str) -> bool {
    matches!(
        method,
        GET_TRANSACTION | GET_LEADER_SCHEDULE | GET_SIGNATURES_FOR_ADDRESS | GET_SIGNATURE_STATUSES
    )
}

// Upstream JSON-RPC error codes.
pub const BLOCK_CLEANED_UP_ERR_CODE: i32 = -32001;
pub const SEND_TRANSACTION_PREFLIGHT_FAILURE_ERR_CODE: i32 = -32002;
pub const TRANSACTION_SIGNATURE_VERIFICATION_FAILURE_ERR_CODE: i32 = -32003;
pub const BLOCK_NOT_AVAILABLE_ERR_CODE: i32 = -32004;
pub const NODE_UNHEALTHY_ERR_CODE: i32 = -32005;
pub const TRANSACTION_PRECOMPILE_VERIFICATION_FAILURE_ERR_CODE: i32 = -32006;
pub const SLOT_SKIPPED_ERR_CODE: i32 = -32007;
pub const NO_SNAPSHOT_ERR_CODE: i32 = -32008;
pub const LONG_TERM_STORAGE_SLOT_SKIPPED_ERR_CODE: i32 = -32009;
pub const KEY_EXCLUDED_FROM_SECONDARY_INDEX_ERR_CODE: i32 = -32010;
pub const TRANSACTION_HISTORY_NOT_AVAILABLE_ERR_CODE: i32 = -32011;
pub const SCAN_ERR_CODE: i32 = -32012;
pub const TRANSACTION_SIGNATURE_LEN_MISMATCH_ERR_CODE: i32 = -32013;
pub const BLOCK_STATUS_NOT_AVAILABLE_YET_ERR_CODE: i32 = -32014;
pub const UNSUPPORTED_TRANSACTION_VERSION_ERR_CODE: i32 = -32015;
pub const MIN_CONTEXT_SLOT_NOT_REACHED_ERR_CODE: i32 = -32016;
pub const PARSE_ERR_CODE: i32 = -32700;
pub const INVALID_REQUEST_ERR_CODE: i32 = -32600;
pub const METHOD_NOT_FOUND_ERR_CODE: i32 = -32601;
pub const INVALID_PARAMS_ERR_CODE: i32 = -32602;
pub const INTERNAL_ERROR_ERR_CODE: i32 = -32603;

/// Extracts the first available slot from a `BlockCleanedUp` (-32001) error
/// message. The node reports it as the trailing number after the last ": ".
#[must_use]
pub fn first_available_slot(message: &str) -> Option<u64> {
    message.rsplit(": ").next()?.parse().ok()
}

/// Node capability tier names as they appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NodeKind {
    #[default]
    #[serde(rename = "basic_node")]
    Basic,
    #[serde(rename = "extended_node")]
    Extended,
    #[serde(rename = "archive_node")]
    Archive,
}

/// Capability description of an upstream node: its tier plus how many slots
/// of ledger history it keeps (meaningful for non-archive tiers).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeType {
    #[serde(default)]
    pub name: NodeKind,
    #[serde(default, alias = "availableSlotsHistory")]
    pub available_slots_history: i64,
}

impl NodeType {
    #[must_use]
    pub fn is_archive(&self) -> bool {
        self.name == NodeKind::Archive
    }

    /// Whether this node tier can answer `method`.
    ///
    /// Methods outside the known RPC list (DAS and other sidecar APIs) are
    /// not constrained by the tier: routing for those is decided purely by
    /// the endpoint's explicit method lists.
    #[must_use]
    pub fn supports(&self, method: &str) -> bool {
        if ACCOUNT_TIER_SET.contains(method) {
            return true;
        }
        if HISTORY_TIER_SET.contains(method) {
            return matches!(self.name, NodeKind::Extended | NodeKind::Archive);
        }
        true
    }
}
