// src/workspace.rs
//
// Forwards NSWorkspace notifications to the dispatch queue.
// The observer lives on the main thread; NSWorkspace posts on the main run
// loop, which the platform pumps between queue drains.

use std::collections::BTreeMap;

use crankd_core::event::{Event, EventSender, WorkspaceEvent};
use log::{debug, info, warn};
use objc2::rc::Retained;
use objc2::runtime::AnyObject;
use objc2::{DefinedClass, MainThreadMarker, MainThreadOnly, define_class, msg_send, sel};
use objc2_app_kit::NSWorkspace;
use objc2_foundation::{NSNotification, NSNotificationCenter, NSObject, NSObjectProtocol, NSString};

pub struct ObserverIvars {
    tx: EventSender,
}

define_class!(
    // SAFETY:
    // - The superclass NSObject does not have any subclassing requirements.
    // - WorkspaceObserver does not implement Drop.
    #[unsafe(super(NSObject))]
    #[thread_kind = MainThreadOnly]
    #[name = "CrankdWorkspaceObserver"]
    #[ivars = ObserverIvars]
    pub struct WorkspaceObserver;

    unsafe impl NSObjectProtocol for WorkspaceObserver {}

    impl WorkspaceObserver {
        #[unsafe(method(onNotification:))]
        fn on_notification(&self, notification: &NSNotification) {
            let event = WorkspaceEvent {
                name: notification.name().to_string(),
                user_info: user_info(notification),
            };
            debug!("Received {}", event.name);

            if self.ivars().tx.send(Event::Workspace(event)).is_err() {
                warn!("Dropping NSWorkspace notification: dispatcher is gone");
            }
        }
    }
);

impl WorkspaceObserver {
    fn new(tx: EventSender, mtm: MainThreadMarker) -> Retained<Self> {
        let this = Self::alloc(mtm).set_ivars(ObserverIvars { tx });
        unsafe { msg_send![super(this), init] }
    }
}

/// Render every entry of the notification's userInfo with `-description`.
fn user_info(notification: &NSNotification) -> BTreeMap<String, String> {
    let mut rendered = BTreeMap::new();
    let Some(info) = notification.userInfo() else {
        return rendered;
    };

    // SAFETY: userInfo is an immutable dictionary of Objective-C objects, and
    // -description is defined on every NSObject.
    unsafe {
        for key in info.allKeys().iter() {
            let Some(value) = info.objectForKey(&key) else {
                continue;
            };
            rendered.insert(describe(&key), describe(&value));
        }
    }
    rendered
}

unsafe fn describe(object: &AnyObject) -> String {
    let description: Retained<NSString> = unsafe { msg_send![object, description] };
    description.to_string()
}

/// Keeps the observer registered; dropping it stops delivery.
pub struct WorkspaceSubscription {
    center: Retained<NSNotificationCenter>,
    observer: Retained<WorkspaceObserver>,
}

impl Drop for WorkspaceSubscription {
    fn drop(&mut self) {
        unsafe { self.center.removeObserver(&self.observer) };
        debug!("NSWorkspace observer removed");
    }
}

/// Register one observer for every name in `names`.
pub fn subscribe(names: &[String], tx: EventSender, mtm: MainThreadMarker) -> WorkspaceSubscription {
    let observer = WorkspaceObserver::new(tx, mtm);

    let workspace = NSWorkspace::sharedWorkspace();
    let center = workspace.notificationCenter();

    for name in names {
        let notification_name = NSString::from_str(name);
        unsafe {
            center.addObserver_selector_name_object(
                &observer,
                sel!(onNotification:),
                Some(&notification_name),
                None,
            );
        }
    }

    info!("NSWorkspace observer registered for {} notifications", names.len());
    WorkspaceSubscription { center, observer }
}
