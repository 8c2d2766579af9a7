//! C-ABI bridge exposing [`musique_node::MusiqueNode`]'s host-facing
//! facade by stable `extern "C"` symbol name, for linking into a native
//! embedder. Grounded on the original cgo bridge's exported functions
//! (`ServerInit`, `ServerBeginProtocol`); generalized here to cover every
//! operation in the facade and to support more than one live node per
//! process via an opaque integer handle.
//!
//! Every function blocks the calling (native) thread on a process-wide
//! Tokio runtime; this mirrors the synchronous, blocking nature of a cgo
//! call boundary -- the embedder has no concept of a Rust `Future`.

use std::collections::HashMap;
use std::ffi::{c_char, CStr};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, OnceLock};

use musique_node::config::NodeConfig;
use musique_node::MusiqueNode;

/// Negative return codes signal failure to the embedder; 0 or a positive
/// handle signals success.
const ERR_INVALID_ARGUMENT: i32 = -1;
const ERR_STARTUP_FAILED: i32 = -2;
const ERR_UNKNOWN_HANDLE: i32 = -3;

fn runtime() -> &'static tokio::runtime::Runtime {
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| tokio::runtime::Runtime::new().expect("failed to start the musique-ffi Tokio runtime"))
}

fn registry() -> &'static Mutex<HashMap<i32, MusiqueNode>> {
    static REGISTRY: OnceLock<Mutex<HashMap<i32, MusiqueNode>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn next_handle() -> i32 {
    static NEXT: AtomicI32 = AtomicI32::new(1);
    NEXT.fetch_add(1, Ordering::SeqCst)
}

/// # Safety
/// `nick` must be a valid, null-terminated UTF-8 C string, or null.
unsafe fn c_str_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(str::to_owned)
}

/// Start a node listening on `port` under the given `nick`. Returns a
/// positive node handle on success, or a negative error code.
///
/// # Safety
/// `nick` must be a valid, null-terminated UTF-8 C string.
#[no_mangle]
pub unsafe extern "C" fn musique_server_init(nick: *const c_char, port: u16) -> i32 {
    let Some(nick) = c_str_to_string(nick) else { return ERR_INVALID_ARGUMENT };
    if nick.is_empty() {
        return ERR_INVALID_ARGUMENT;
    }

    let config = NodeConfig::new(nick).with_bind_port(port);
    let result = runtime().block_on(MusiqueNode::server_init(config));

    match result {
        Ok(node) => {
            let handle = next_handle();
            registry().lock().unwrap().insert(handle, node);
            handle
        }
        Err(e) => {
            log::error!("[ffi] musique_server_init failed: {e}");
            ERR_STARTUP_FAILED
        }
    }
}

/// Update the node's reaction-time budget for synchronized starts.
#[no_mangle]
pub extern "C" fn musique_set_timeout(handle: i32, ms: i64) -> i32 {
    with_node(handle, |node| {
        node.set_timeout(ms);
        0
    })
}

/// Run a discovery cycle and refresh latency samples for whatever it finds.
#[no_mangle]
pub extern "C" fn musique_discover(handle: i32) -> i32 {
    with_node(handle, |node| match runtime().block_on(node.discover()) {
        Ok(()) => 0,
        Err(e) => {
            log::warn!("[ffi] musique_discover failed: {e}");
            ERR_STARTUP_FAILED
        }
    })
}

/// Broadcast a synchronized start and block until the rendezvous fires.
#[no_mangle]
pub extern "C" fn musique_server_begin_protocol(handle: i32) -> i32 {
    with_node(handle, |node| {
        runtime().block_on(node.server_begin_protocol());
        0
    })
}

/// Write `nick@address` lines for every known peer to stdout.
#[no_mangle]
pub extern "C" fn musique_list_known_remotes(handle: i32) -> i32 {
    with_node(handle, |node| {
        node.list_known_remotes();
        0
    })
}

fn with_node(handle: i32, f: impl FnOnce(&MusiqueNode) -> i32) -> i32 {
    match registry().lock().unwrap().get(&handle) {
        Some(node) => f(node),
        None => ERR_UNKNOWN_HANDLE,
    }
}
