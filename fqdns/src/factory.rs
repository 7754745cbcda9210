//! Builds the process-wide [`SocketFactory`] from the global `--outbound-*`
//! flags, once at startup (`spec.md` §5: "process-wide configuration set
//! once at startup and read-only thereafter").

use socket_factory::SocketFactory;

use crate::cli::GlobalArgs;

pub fn build(global: &GlobalArgs) -> SocketFactory {
    SocketFactory::new(global.outbound_mark, global.outbound_ip)
}
