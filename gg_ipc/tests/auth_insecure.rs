// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

// Registry behavior with authentication disabled. The insecure flag is
// process-wide and sticky, so every test here runs under it.

use gg_ipc::auth::{
    get_handle_by_svcuid, lookup_by_name, register_client, set_insecure_mode, verify_svcuid,
};

#[test]
fn client_supplied_names_become_svcuids() {
    set_insecure_mode();

    let (handle, svcuid) = register_client(1234, Some(b"comp.debug")).unwrap();
    assert_eq!(svcuid, "comp.debug");

    let (again, svcuid2) = register_client(5678, Some(b"comp.debug")).unwrap();
    assert_eq!(handle, again);
    assert_eq!(svcuid2, "comp.debug");

    assert_eq!(lookup_by_name(b"comp.debug"), Some(handle));
}

#[test]
fn missing_hint_falls_back_to_pid() {
    set_insecure_mode();

    let (_, svcuid) = register_client(4242, None).unwrap();
    assert_eq!(svcuid, "pid-4242");
}

#[test]
fn presented_names_register_on_first_sight() {
    set_insecure_mode();

    assert!(verify_svcuid(b"comp.first-sight"));
    let handle = lookup_by_name(b"comp.first-sight").expect("name was not stored");
    assert_eq!(get_handle_by_svcuid(b"comp.first-sight").unwrap(), handle);
}
