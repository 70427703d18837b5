// src/dynamic_store.rs
//
// SCDynamicStore session that reports key changes to the dispatch queue.
// Only the handful of SystemConfiguration calls crankd needs are declared.

use std::ffi::{CStr, c_char, c_int, c_void};
use std::ptr;

use core_foundation::array::{CFArray, CFArrayRef};
use core_foundation::base::{CFIndex, CFType, CFTypeID, CFTypeRef, TCFType, kCFAllocatorDefault};
use core_foundation::runloop::{CFRunLoop, CFRunLoopSource, CFRunLoopSourceRef, kCFRunLoopDefaultMode};
use core_foundation::string::{CFString, CFStringRef};
use core_foundation::{declare_TCFType, impl_TCFType};
use core_foundation_sys::base::{Boolean, CFAllocatorRef, CFCopyDescription};
use core_foundation_sys::runloop::CFRunLoopSourceInvalidate;
use crankd_core::event::{ChangedKey, ConfigStoreEvent, Event, EventSender};
use crankd_core::{CrankdError, Result};
use log::{debug, info, warn};

#[repr(C)]
pub struct __SCDynamicStore(c_void);

pub type SCDynamicStoreRef = *const __SCDynamicStore;

type SCDynamicStoreCallBack =
    extern "C" fn(store: SCDynamicStoreRef, changed_keys: CFArrayRef, info: *mut c_void);

#[repr(C)]
struct SCDynamicStoreContext {
    version: CFIndex,
    info: *mut c_void,
    retain: Option<extern "C" fn(*const c_void) -> *const c_void>,
    release: Option<extern "C" fn(*const c_void)>,
    copy_description: Option<extern "C" fn(*const c_void) -> CFStringRef>,
}

#[link(name = "SystemConfiguration", kind = "framework")]
unsafe extern "C" {
    fn SCDynamicStoreGetTypeID() -> CFTypeID;

    fn SCDynamicStoreCreate(
        allocator: CFAllocatorRef,
        name: CFStringRef,
        callout: Option<SCDynamicStoreCallBack>,
        context: *mut SCDynamicStoreContext,
    ) -> SCDynamicStoreRef;

    fn SCDynamicStoreSetNotificationKeys(
        store: SCDynamicStoreRef,
        keys: CFArrayRef,
        patterns: CFArrayRef,
    ) -> Boolean;

    fn SCDynamicStoreCreateRunLoopSource(
        allocator: CFAllocatorRef,
        store: SCDynamicStoreRef,
        order: CFIndex,
    ) -> CFRunLoopSourceRef;

    fn SCDynamicStoreCopyKeyList(store: SCDynamicStoreRef, pattern: CFStringRef) -> CFArrayRef;

    fn SCDynamicStoreCopyValue(store: SCDynamicStoreRef, key: CFStringRef) -> CFTypeRef;

    fn SCError() -> c_int;

    fn SCErrorString(status: c_int) -> *const c_char;
}

declare_TCFType!(SCDynamicStore, SCDynamicStoreRef);
impl_TCFType!(SCDynamicStore, SCDynamicStoreRef, SCDynamicStoreGetTypeID);

const SESSION_NAME: &str = "crankd";

fn last_error(what: &str) -> CrankdError {
    // SAFETY: SCErrorString returns a static C string for any status.
    let message = unsafe {
        let status = SCError();
        CStr::from_ptr(SCErrorString(status))
            .to_string_lossy()
            .into_owned()
    };
    CrankdError::Platform(format!("{what}: {message}"))
}

fn create(
    callout: Option<SCDynamicStoreCallBack>,
    context: *mut SCDynamicStoreContext,
) -> Result<SCDynamicStore> {
    let name = CFString::new(SESSION_NAME);
    // SAFETY: `name` outlives the call; `context` is null or points to a live
    // context whose contents the store copies.
    let store = unsafe {
        SCDynamicStoreCreate(
            kCFAllocatorDefault,
            name.as_concrete_TypeRef(),
            callout,
            context,
        )
    };
    if store.is_null() {
        return Err(last_error("Unable to create a SystemConfiguration session"));
    }
    // SAFETY: Create rule, we own the only reference.
    Ok(unsafe { SCDynamicStore::wrap_under_create_rule(store) })
}

/// Every key currently in the store, unsorted.
pub fn key_list() -> Result<Vec<String>> {
    let store = create(None, ptr::null_mut())?;
    let pattern = CFString::new(".*");
    // SAFETY: both arguments are live CF objects.
    let keys = unsafe {
        SCDynamicStoreCopyKeyList(store.as_concrete_TypeRef(), pattern.as_concrete_TypeRef())
    };
    if keys.is_null() {
        return Err(last_error("Unable to list SystemConfiguration keys"));
    }
    // SAFETY: Copy rule, the array of CFStrings is ours.
    let keys: CFArray<CFString> = unsafe { CFArray::wrap_under_create_rule(keys) };
    Ok(keys.iter().map(|key| key.to_string()).collect())
}

/// Description of the current value of `key`, if it has one.
fn value_description(store: SCDynamicStoreRef, key: &CFString) -> Option<String> {
    // SAFETY: the store is the one handed to the callout; the key is live.
    let value = unsafe { SCDynamicStoreCopyValue(store, key.as_concrete_TypeRef()) };
    if value.is_null() {
        return None;
    }
    // SAFETY: Copy rule for both the value and its description.
    unsafe {
        let value = CFType::wrap_under_create_rule(value);
        let description = CFCopyDescription(value.as_CFTypeRef());
        if description.is_null() {
            return None;
        }
        Some(CFString::wrap_under_create_rule(description).to_string())
    }
}

extern "C" fn on_change(store: SCDynamicStoreRef, changed_keys: CFArrayRef, info: *mut c_void) {
    if info.is_null() || changed_keys.is_null() {
        return;
    }
    // SAFETY: `info` is the sender boxed by `ConfigStoreSession::watch`, which
    // outlives the run loop source that calls us.
    let tx = unsafe { &*(info as *const EventSender) };
    // SAFETY: Get rule, the store keeps ownership of the array.
    let changed_keys: CFArray<CFString> = unsafe { CFArray::wrap_under_get_rule(changed_keys) };

    let changed = changed_keys
        .iter()
        .map(|key| ChangedKey {
            key: key.to_string(),
            info: value_description(store, &key),
        })
        .collect();

    if tx.send(Event::ConfigStore(ConfigStoreEvent { changed })).is_err() {
        warn!("Dropping SystemConfiguration change: dispatcher is gone");
    }
}

/// A store session registered on the current run loop. Dropping it removes
/// the source and closes the session.
pub struct ConfigStoreSession {
    source: CFRunLoopSource,
    // Held open for as long as the source is scheduled.
    _store: SCDynamicStore,
    sender: *mut EventSender,
}

impl ConfigStoreSession {
    /// Watch `keys`. The store treats each one as a regular expression.
    pub fn watch(keys: &[String], tx: EventSender) -> Result<Self> {
        let sender = Box::into_raw(Box::new(tx));
        let mut context = SCDynamicStoreContext {
            version: 0,
            info: sender.cast(),
            retain: None,
            release: None,
            copy_description: None,
        };

        let store = match create(Some(on_change), &mut context) {
            Ok(store) => store,
            Err(e) => {
                // SAFETY: the store was not created, nothing else holds it.
                drop(unsafe { Box::from_raw(sender) });
                return Err(e);
            }
        };

        let patterns: Vec<CFString> = keys.iter().map(|k| CFString::new(k)).collect();
        let patterns = CFArray::from_CFTypes(&patterns);

        // SAFETY: live store and array.
        let ok = unsafe {
            SCDynamicStoreSetNotificationKeys(
                store.as_concrete_TypeRef(),
                ptr::null(),
                patterns.as_concrete_TypeRef(),
            )
        };
        if ok == 0 {
            drop(store);
            // SAFETY: the store never got a run loop source, so it never calls out.
            drop(unsafe { Box::from_raw(sender) });
            return Err(last_error("Unable to register SystemConfiguration keys"));
        }

        // SAFETY: live store.
        let source = unsafe {
            SCDynamicStoreCreateRunLoopSource(kCFAllocatorDefault, store.as_concrete_TypeRef(), 0)
        };
        if source.is_null() {
            drop(store);
            // SAFETY: as above.
            drop(unsafe { Box::from_raw(sender) });
            return Err(last_error("Unable to create a SystemConfiguration run loop source"));
        }
        // SAFETY: Create rule.
        let source = unsafe { CFRunLoopSource::wrap_under_create_rule(source) };
        // SAFETY: kCFRunLoopDefaultMode is a constant CFString.
        CFRunLoop::get_current().add_source(&source, unsafe { kCFRunLoopDefaultMode });

        info!("SystemConfiguration session watching {} keys", keys.len());
        Ok(Self {
            source,
            _store: store,
            sender,
        })
    }
}

impl Drop for ConfigStoreSession {
    fn drop(&mut self) {
        // SAFETY: kCFRunLoopDefaultMode is a constant CFString; the source is live.
        unsafe {
            CFRunLoop::get_current().remove_source(&self.source, kCFRunLoopDefaultMode);
            CFRunLoopSourceInvalidate(self.source.as_concrete_TypeRef());
        }
        // SAFETY: with its source invalidated the store can no longer call
        // out, so nothing reads the sender after this.
        drop(unsafe { Box::from_raw(self.sender) });
        debug!("SystemConfiguration session closed");
    }
}
