// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::env;
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mailroom_store::config::{StaticSettings, StoreConfig, CIPHER_KEY_ENV, LOG_FORMAT_ENV};
use mailroom_store::crypto::{AeadCipher, CredentialCipher, NoKeyCipher, DEFAULT_KEY_ID};
use mailroom_store::service::{GroupService, SenderService};
use mailroom_store::storage::{Record, StoragePaths, StoreContext, Table};
use mailroom_store::StoreResult;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match env::var(LOG_FORMAT_ENV).as_deref() {
        Ok("json") => builder.json().init(),
        _ => builder.init(),
    }
}

fn cipher_from_env() -> Arc<dyn CredentialCipher> {
    let Ok(encoded) = env::var(CIPHER_KEY_ENV) else {
        info!("no credential key configured, new app passwords are stored plain");
        return Arc::new(NoKeyCipher);
    };
    match AeadCipher::new().with_base64_key(DEFAULT_KEY_ID, &encoded) {
        Ok(cipher) => Arc::new(cipher),
        Err(err) => {
            warn!(error = %err, "ignoring unusable credential key");
            Arc::new(NoKeyCipher)
        }
    }
}

fn print_table<R: Record>(table: &Table<R>) {
    let mode = table.mode();
    let label = match (mode.remote_enabled, mode.remote_only) {
        (false, _) => "local",
        (true, true) => "remote-only",
        (true, false) => "remote+snapshot",
    };
    println!(
        "{:<28} {:<16} rows={:<6} next_id={}",
        R::SPEC.logical,
        label,
        table.rows().len(),
        table.next_id()
    );
}

fn run() -> StoreResult<()> {
    let config = StoreConfig::resolve(StoragePaths::from_env(), &StaticSettings::default());
    let ctx = StoreContext::from_config(&config)?;

    let senders = SenderService::open(&ctx, cipher_from_env())?;
    print_table(senders.senders().table());
    print_table(senders.credentials().table());

    if !ctx.is_remote() {
        println!("recipients and groups need a remote store; set the remote endpoint to list them");
        return Ok(());
    }

    let groups = GroupService::open(&ctx)?;
    print_table(groups.recipients().table());
    print_table(groups.groups().table());
    match groups.memberships() {
        Some(memberships) => print_table(memberships.table()),
        None => println!("{:<28} legacy group fields", "recipient_group_membership"),
    }

    for group in groups.list_groups() {
        let members = groups.list_group_recipients(group.group_id)?;
        println!("group {} \"{}\": {} recipient(s)", group.group_id, group.name, members.len());
        for recipient in members {
            println!("  {} {}", recipient.recipient_id, recipient.address);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            let mut source = err.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
