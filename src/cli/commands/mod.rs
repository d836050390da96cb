use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

const TLS_VERSIONS: [&str; 2] = ["TLS12", "TLS13"];

/// Arguments shared by `probe` and `serve`
fn module_args() -> Vec<Arg> {
    vec![
        Arg::new("timeout")
            .default_value("10")
            .env("TDSCERT_TIMEOUT")
            .help("seconds allowed for dial, TLS handshake and request")
            .long("timeout")
            .value_parser(clap::value_parser!(u64)),
        Arg::new("server-name")
            .env("TDSCERT_SERVER_NAME")
            .help("Name to verify the certificate against (default: target host)")
            .long("server-name")
            .value_name("NAME"),
        Arg::new("tls-ca")
            .env("TDSCERT_TLS_CA")
            .help("Path to CA bundle for certificate verification")
            .long("tls-ca")
            .long_help(
                "Path to a PEM bundle of trusted Certificate Authorities.\n\
                Without it the bundled Mozilla root store is used.\n\n\
                Example: /etc/ssl/certs/ca-certificates.crt",
            )
            .value_name("PATH"),
        Arg::new("tls-cert")
            .env("TDSCERT_TLS_CERT")
            .help("Path to client certificate file for TLS client authentication")
            .long("tls-cert")
            .value_name("PATH")
            .requires("tls-key"),
        Arg::new("tls-key")
            .env("TDSCERT_TLS_KEY")
            .help("Path to client private key file for TLS client authentication")
            .long("tls-key")
            .value_name("PATH")
            .requires("tls-cert"),
        Arg::new("insecure-skip-verify")
            .action(ArgAction::SetTrue)
            .env("TDSCERT_INSECURE_SKIP_VERIFY")
            .help("Accept any certificate chain (the certificate is still reported)")
            .long("insecure-skip-verify"),
        Arg::new("tls-min-version")
            .env("TDSCERT_TLS_MIN_VERSION")
            .help("Lowest TLS version to offer")
            .long("tls-min-version")
            .value_name("VERSION")
            .value_parser(TLS_VERSIONS),
        Arg::new("tls-max-version")
            .env("TDSCERT_TLS_MAX_VERSION")
            .help("Highest TLS version to offer")
            .long("tls-max-version")
            .value_name("VERSION")
            .value_parser(TLS_VERSIONS),
    ]
}

/// Pure clap command definitions with zero business logic
#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new(env!("CARGO_PKG_NAME"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("probe")
                .about("Probe one endpoint and print the TLS state as JSON")
                .arg(
                    Arg::new("target")
                        .env("TDSCERT_TARGET")
                        .help("<host>:<port> of the SQL Server endpoint")
                        .long("target")
                        .short('t')
                        .value_name("HOST:PORT")
                        .required(true),
                )
                .args(module_args()),
        )
        .subcommand(
            Command::new("serve")
                .about("Serve probes over HTTP for Prometheus (/probe?target=host:port)")
                .arg(
                    Arg::new("listen")
                        .env("TDSCERT_LISTEN")
                        .help("IP address to bind to (default: [::]:port, accepts both IPv6 and IPv4)")
                        .long("listen")
                        .long_help(
                            "IP address to bind to:\n\
                            Not specified (default) binds to [::]:port which accepts both IPv6 and IPv4 connections.\n\
                            Falls back to 0.0.0.0:port if IPv6 is unavailable.\n\n\
                            Specific IPv4 examples: '0.0.0.0', '127.0.0.1'\n\
                            Specific IPv6: '::', '::1'",
                        )
                        .short('l')
                        .value_name("IP"),
                )
                .arg(
                    Arg::new("port")
                        .default_value("9219")
                        .env("TDSCERT_PORT")
                        .help("listening port for /probe and /metrics")
                        .long("port")
                        .short('p')
                        .value_parser(clap::value_parser!(u16)),
                )
                .args(module_args()),
        )
}
