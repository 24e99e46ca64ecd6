//! Windows device interface enumeration.
//!
//! `SetupDiGetClassDevsW(DIGCF_PRESENT | DIGCF_DEVICEINTERFACE)` over a class GUID,
//! then one `SetupDiGetDeviceInterfaceDetailW` per interface to get the path that
//! `CreateFileW` accepts. Order is the order SetupAPI reports.

#![cfg(target_os = "windows")]

use crate::device::ClassGuid;
use crate::error::{TransportError, TransportResult};
use std::mem::size_of;
use std::ptr::{null, null_mut};

use windows_sys::core::GUID;
use windows_sys::Win32::Devices::DeviceAndDriverInstallation::{
    SetupDiDestroyDeviceInfoList, SetupDiEnumDeviceInterfaces, SetupDiGetClassDevsW,
    SetupDiGetDeviceInterfaceDetailW, DIGCF_DEVICEINTERFACE, DIGCF_PRESENT, HDEVINFO,
    SP_DEVICE_INTERFACE_DATA, SP_DEVICE_INTERFACE_DETAIL_DATA_W,
};
use windows_sys::Win32::Foundation::{
    GetLastError, ERROR_INSUFFICIENT_BUFFER, ERROR_NO_MORE_ITEMS, INVALID_HANDLE_VALUE,
};

pub(crate) fn to_guid(class: &ClassGuid) -> GUID {
    GUID {
        data1: class.data1,
        data2: class.data2,
        data3: class.data3,
        data4: class.data4,
    }
}

/// Device info set; destroyed on drop.
struct DevInfoList(HDEVINFO);

impl Drop for DevInfoList {
    fn drop(&mut self) {
        unsafe {
            SetupDiDestroyDeviceInfoList(self.0);
        }
    }
}

/// Present device interface paths for `class`.
pub(crate) fn enumerate_interfaces(class: &ClassGuid) -> TransportResult<Vec<String>> {
    let guid = to_guid(class);
    let set = unsafe {
        SetupDiGetClassDevsW(
            &guid,
            null(),
            null_mut(),
            DIGCF_PRESENT | DIGCF_DEVICEINTERFACE,
        )
    };
    if set == INVALID_HANDLE_VALUE as HDEVINFO {
        return Err(TransportError::Os {
            op: "SetupDiGetClassDevsW",
            code: unsafe { GetLastError() },
        });
    }
    let set = DevInfoList(set);

    let mut paths = Vec::new();
    for index in 0.. {
        let mut iface: SP_DEVICE_INTERFACE_DATA = unsafe { std::mem::zeroed() };
        iface.cbSize = size_of::<SP_DEVICE_INTERFACE_DATA>() as u32;
        let ok = unsafe { SetupDiEnumDeviceInterfaces(set.0, null(), &guid, index, &mut iface) };
        if ok == 0 {
            let code = unsafe { GetLastError() };
            if code == ERROR_NO_MORE_ITEMS {
                break;
            }
            return Err(TransportError::Os {
                op: "SetupDiEnumDeviceInterfaces",
                code,
            });
        }
        match interface_path(&set, &iface) {
            Ok(path) => paths.push(path),
            // An interface that vanished mid-walk is skipped, not fatal.
            Err(e) => log::debug!("skipping interface {index}: {e}"),
        }
    }
    Ok(paths)
}

fn interface_path(set: &DevInfoList, iface: &SP_DEVICE_INTERFACE_DATA) -> TransportResult<String> {
    let mut required = 0u32;
    let ok = unsafe {
        SetupDiGetDeviceInterfaceDetailW(set.0, iface, null_mut(), 0, &mut required, null_mut())
    };
    if ok == 0 {
        let code = unsafe { GetLastError() };
        if code != ERROR_INSUFFICIENT_BUFFER {
            return Err(TransportError::Os {
                op: "SetupDiGetDeviceInterfaceDetailW",
                code,
            });
        }
    }

    // u32 storage keeps the detail struct aligned.
    let words = (required as usize).div_ceil(size_of::<u32>());
    let mut storage = vec![0u32; words.max(2)];
    let detail = storage.as_mut_ptr().cast::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>();
    unsafe {
        (*detail).cbSize = size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>() as u32;
    }
    let ok = unsafe {
        SetupDiGetDeviceInterfaceDetailW(set.0, iface, detail, required, null_mut(), null_mut())
    };
    if ok == 0 {
        return Err(TransportError::Os {
            op: "SetupDiGetDeviceInterfaceDetailW",
            code: unsafe { GetLastError() },
        });
    }

    // DevicePath is a NUL-terminated UTF-16 string starting after cbSize.
    let path_offset = std::mem::offset_of!(SP_DEVICE_INTERFACE_DETAIL_DATA_W, DevicePath);
    let max_units = (required as usize).saturating_sub(path_offset) / 2;
    let wide = unsafe {
        let start = detail.cast::<u8>().add(path_offset).cast::<u16>();
        std::slice::from_raw_parts(start, max_units)
    };
    let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    Ok(String::from_utf16_lossy(&wide[..len]))
}
