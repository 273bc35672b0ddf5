//! Operator walkthroughs printed by `pgtopo guide`.

const INTRO: &str = "\
pgtopo
======

Builds and manages PostgreSQL streaming replication and failover
over SSH. Targets Debian hosts; other platforms need their own
package installer.

The operator key must be accepted by the administrative account on
every host, and agent forwarding should be enabled.

Typical usage:

o Create a primary with two standbys (9.3)
------------------------------------------

$ pgtopo setup-primary 10.0.0.1
$ pgtopo attach-standby 10.0.0.1 10.0.0.2
$ pgtopo attach-standby 10.0.0.1 10.0.0.3

o Fail over to a standby after the primary is lost
--------------------------------------------------

Promote a new primary:
$ pgtopo push-key 10.0.0.2
$ pgtopo promote 10.0.0.2

Attach 10.0.0.3 to 10.0.0.2:
$ pgtopo attach-standby 10.0.0.2 10.0.0.3

Attach 10.0.0.1 (old primary) to 10.0.0.2:
$ pgtopo attach-standby 10.0.0.2 10.0.0.1

Run topology commands one at a time. Two attach-standby runs against
the same primary at once can race on its pg_hba.conf.

For further info:

$ pgtopo guide <topic>

where <topic> is a command name.
";

const SETUP_PRIMARY: &str = "\
Set up a primary node
=====================

$ pgtopo setup-primary <primary host>

Best run on a host without a previous PostgreSQL install, where
/var/lib/postgresql and /etc/postgresql do not exist yet.
";

const ATTACH_STANDBY: &str = "\
Attach a standby node
=====================

$ pgtopo attach-standby <primary host> <standby host>

Grants the standby replication access in the primary's pg_hba.conf
(once), then wipes the standby's data directory and restores it from
a base backup of the primary. You are asked before anything is
deleted; answering no still rewrites postgresql.conf, fixes ownership
and restarts the service.
";

const PROMOTE: &str = "\
Promote
=======

$ pgtopo promote <node host>

Turns a standby into a primary after a failover. Other standbys keep
following the old primary until you attach them to the new one with
attach-standby.

pg_ctl promote runs as the postgres account, so that account must
accept your key. Use push-key or pass --push-key.
";

const PUSH_KEY: &str = "\
Push ssh key
============

$ pgtopo push-key <node host> [--key-path ~/.ssh/id_rsa] [--generate-key]

Appends your public key to the postgres account's authorized_keys.

--generate-key creates an RSA key pair with an EMPTY passphrase so
that promote can run unattended. Anyone who can read that private key
can log in as postgres on every host it was pushed to. Prefer an
existing, protected key when you are at the keyboard.
";

/// Topic names accepted by `pgtopo guide`.
pub const TOPICS: [&str; 5] = ["intro", "setup-primary", "attach-standby", "promote", "push-key"];

/// Text for `topic`; unknown topics show the introduction.
pub fn topic(name: &str) -> &'static str {
    match name {
        "setup-primary" | "setup_primary" => SETUP_PRIMARY,
        "attach-standby" | "attach_standby" => ATTACH_STANDBY,
        "promote" => PROMOTE,
        "push-key" | "push_key" => PUSH_KEY,
        _ => INTRO,
    }
}
