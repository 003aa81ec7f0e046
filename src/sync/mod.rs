//! # Tree Synchronization
//!
//! Everything that moves files between repositories and the VMR:
//!
//! - [`patch`]: file-level deltas between two trees and their application
//! - [`reconcile`]: automatic merging of conflicted version files
//! - [`synchronizer`]: repository → VMR updates and the manifest bookkeeping
//! - [`codeflower`]: forward flow, back flow, cherry-picks and conflict resolution
//! - [`conflicts`]: conflicts waiting for a human
//! - [`scanner`], [`notices`], [`bands`], [`publish`]: VMR maintenance commands

pub mod bands;
pub mod codeflower;
pub mod conflicts;
pub mod notices;
pub mod patch;
pub mod publish;
pub mod reconcile;
pub mod scanner;
pub mod submodules;
pub mod synchronizer;

pub use codeflower::{CodeFlowResult, CodeFlower, FlowOptions};
pub use conflicts::{ConflictRecord, ConflictStore};
pub use patch::{ApplyMode, ChangeKind, Conflict, FileChange, TreePatch};
pub use synchronizer::{SyncOptions, SyncResult, VmrSynchronizer};
