// SPDX-License-Identifier: GPL-3.0-only

use volman_types::{ServiceError, VolumeError};

const UDISKS_ERROR_PREFIX: &str = "org.freedesktop.UDisks2.Error.";

/// Map a failed UDisks2 call onto the mount service error vocabulary.
pub fn service_error(err: zbus::Error, target: &str) -> ServiceError {
    match &err {
        zbus::Error::MethodError(name, msg, _info) => {
            method_error(name.as_str(), msg.as_deref(), target)
        }
        _ => ServiceError::Failed(format!("{target}: {err}")),
    }
}

/// Map an error from a typed `udisks2` proxy call. The crate has already
/// decoded UDisks2 error names; transport errors fall through to
/// [`service_error`].
pub fn udisks_error(err: udisks2::Error, target: &str) -> ServiceError {
    let detail = format!("{target}: {err}");
    match err {
        udisks2::Error::AlreadyMounted => ServiceError::AlreadyMounted(detail),
        udisks2::Error::NotMounted => ServiceError::NotMounted(detail),
        udisks2::Error::DeviceBusy | udisks2::Error::AlreadyUnmounting => {
            ServiceError::Busy(detail)
        }
        udisks2::Error::NotSupported => ServiceError::Unsupported(detail),
        udisks2::Error::NotAuthorizedDismissed
        | udisks2::Error::Cancelled
        | udisks2::Error::AlreadyCancelled => ServiceError::AuthCancelled,
        udisks2::Error::Zbus(err) => service_error(err, target),
        _ => ServiceError::Failed(detail),
    }
}

fn method_error(name: &str, msg: Option<&str>, target: &str) -> ServiceError {
    let detail = match msg {
        Some(msg) if !msg.is_empty() => format!("{target}: {msg}"),
        _ => target.to_string(),
    };
    match name.strip_prefix(UDISKS_ERROR_PREFIX) {
        Some("AlreadyMounted") => ServiceError::AlreadyMounted(detail),
        Some("NotMounted") => ServiceError::NotMounted(detail),
        Some("DeviceBusy") => ServiceError::Busy(detail),
        Some("NotSupported") => ServiceError::Unsupported(detail),
        Some("NotAuthorizedDismissed") | Some("Cancelled") => ServiceError::AuthCancelled,
        _ if is_dbus_not_supported(name) => ServiceError::Unsupported(detail),
        _ => ServiceError::Failed(format!("{name}: {detail}")),
    }
}

fn is_dbus_not_supported(name: &str) -> bool {
    matches!(
        name,
        "org.freedesktop.DBus.Error.UnknownInterface"
            | "org.freedesktop.DBus.Error.UnknownMethod"
            | "org.freedesktop.DBus.Error.UnknownObject"
    )
}

/// The bridge only fails when the user declines or another prompt is open.
pub fn credential_error(err: VolumeError) -> ServiceError {
    match err {
        VolumeError::AuthCancelled => ServiceError::AuthCancelled,
        VolumeError::Busy(target) => ServiceError::Busy(target),
        other => ServiceError::Failed(other.to_string()),
    }
}
