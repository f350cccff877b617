// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Command line interface. */

use {
    crate::context::Context,
    clap::{Arg, ArgAction, ArgMatches, Command},
    debian_archive::{
        cancel::CancellationToken,
        control::StanzaReader,
        download::download_with_retry,
        error::ArchiveError,
        http::HttpDownloader,
        local_repo::LocalRepo,
        package::Package,
        package_list::PackageList,
        publish::{database_cleanup, PublishSource, PublishedRepo},
        remote_repo::RemoteRepo,
        signer::{GpgSigner, Signer},
        snapshot::Snapshot,
    },
    std::io::BufReader,
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Archive(#[from] ArchiveError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

pub type Result<T> = std::result::Result<T, ToolError>;

fn comma_list(value: Option<&String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

pub async fn run_cli() -> Result<()> {
    let app = Command::new("debian-archive-tool")
        .about("Manage Debian package archives: mirror, snapshot, publish")
        .arg_required_else_help(true)
        .arg(
            Arg::new("root")
                .long("root")
                .global(true)
                .help("Root directory for the catalog, pool and published trees"),
        )
        .subcommand(
            Command::new("mirror")
                .about("Manage mirrors of remote repositories")
                .arg_required_else_help(true)
                .subcommand(
                    Command::new("create")
                        .about("Create a mirror of a remote repository")
                        .arg(Arg::new("name").required(true))
                        .arg(Arg::new("url").required(true))
                        .arg(Arg::new("distribution").required(true))
                        .arg(Arg::new("component").num_args(0..))
                        .arg(
                            Arg::new("architectures")
                                .long("architectures")
                                .help("Comma-separated list of architectures to mirror"),
                        )
                        .arg(
                            Arg::new("with-sources")
                                .long("with-sources")
                                .action(ArgAction::SetTrue),
                        )
                        .arg(
                            Arg::new("with-udebs")
                                .long("with-udebs")
                                .action(ArgAction::SetTrue),
                        )
                        .arg(
                            Arg::new("with-installer")
                                .long("with-installer")
                                .action(ArgAction::SetTrue),
                        ),
                )
                .subcommand(
                    Command::new("update")
                        .about("Fetch remote indexes and download missing packages")
                        .arg(Arg::new("name").required(true))
                        .arg(
                            Arg::new("max-tries")
                                .long("max-tries")
                                .default_value("3")
                                .help("Download retries before giving up"),
                        ),
                )
                .subcommand(Command::new("list").about("List mirrors"))
                .subcommand(
                    Command::new("drop")
                        .about("Delete a mirror")
                        .arg(Arg::new("name").required(true)),
                ),
        )
        .subcommand(
            Command::new("repo")
                .about("Manage local repositories")
                .arg_required_else_help(true)
                .subcommand(
                    Command::new("create")
                        .about("Create a local repository")
                        .arg(Arg::new("name").required(true))
                        .arg(Arg::new("comment").long("comment").default_value(""))
                        .arg(Arg::new("distribution").long("distribution").default_value(""))
                        .arg(Arg::new("component").long("component").default_value("main")),
                )
                .subcommand(
                    Command::new("add")
                        .about("Add packages described by an index file, importing bodies into the pool")
                        .arg(Arg::new("name").required(true))
                        .arg(
                            Arg::new("index")
                                .required(true)
                                .help("Packages-style index describing the packages"),
                        )
                        .arg(
                            Arg::new("package-root")
                                .long("package-root")
                                .default_value(".")
                                .help("Directory resolving the Filename fields of the index"),
                        ),
                )
                .subcommand(Command::new("list").about("List local repositories")),
        )
        .subcommand(
            Command::new("snapshot")
                .about("Manage snapshots")
                .arg_required_else_help(true)
                .subcommand(
                    Command::new("create")
                        .about("Create a snapshot of a mirror or local repository")
                        .arg(Arg::new("name").required(true))
                        .arg(Arg::new("from-mirror").long("from-mirror"))
                        .arg(Arg::new("from-repo").long("from-repo")),
                )
                .subcommand(
                    Command::new("merge")
                        .about("Merge snapshots into a new one")
                        .arg(Arg::new("name").required(true))
                        .arg(Arg::new("source").num_args(1..).required(true))
                        .arg(
                            Arg::new("no-latest")
                                .long("no-latest")
                                .action(ArgAction::SetTrue)
                                .help("Keep all conflicting package references instead of preferring later sources"),
                        ),
                )
                .subcommand(
                    Command::new("pull")
                        .about("Pull packages (and dependencies) from one snapshot into another")
                        .arg(Arg::new("to").required(true).help("Snapshot to pull into"))
                        .arg(Arg::new("source").required(true).help("Snapshot to pull from"))
                        .arg(Arg::new("destination").required(true).help("Name of the new snapshot"))
                        .arg(Arg::new("package").num_args(1..).required(true))
                        .arg(
                            Arg::new("architectures")
                                .long("architectures")
                                .required(true)
                                .help("Comma-separated list of architectures to resolve for"),
                        )
                        .arg(
                            Arg::new("no-deps")
                                .long("no-deps")
                                .action(ArgAction::SetTrue)
                                .help("Do not follow dependencies of matched packages"),
                        )
                        .arg(
                            Arg::new("all-matches")
                                .long("all-matches")
                                .action(ArgAction::SetTrue)
                                .help("Pull all matching packages instead of the highest version"),
                        ),
                )
                .subcommand(Command::new("list").about("List snapshots"))
                .subcommand(
                    Command::new("drop")
                        .about("Delete a snapshot")
                        .arg(Arg::new("name").required(true)),
                ),
        )
        .subcommand(
            Command::new("publish")
                .about("Manage published repositories")
                .arg_required_else_help(true)
                .subcommand(publish_source_command("snapshot", "Publish a snapshot"))
                .subcommand(publish_source_command("repo", "Publish a local repository"))
                .subcommand(
                    Command::new("switch")
                        .about("Switch a published repository to a different snapshot and re-publish")
                        .arg(Arg::new("distribution").required(true))
                        .arg(Arg::new("snapshot").required(true))
                        .arg(Arg::new("prefix").default_value("."))
                        .arg(Arg::new("component").long("component").default_value("main"))
                        .arg(
                            Arg::new("skip-signing")
                                .long("skip-signing")
                                .action(ArgAction::SetTrue),
                        )
                        .arg(Arg::new("gpg-key").long("gpg-key"))
                        .arg(
                            Arg::new("force-overwrite")
                                .long("force-overwrite")
                                .action(ArgAction::SetTrue),
                        ),
                )
                .subcommand(Command::new("list").about("List published repositories"))
                .subcommand(
                    Command::new("drop")
                        .about("Delete a published repository")
                        .arg(Arg::new("distribution").required(true))
                        .arg(Arg::new("prefix").default_value(".")),
                ),
        )
        .subcommand(
            Command::new("db")
                .about("Catalog maintenance")
                .arg_required_else_help(true)
                .subcommand(
                    Command::new("cleanup")
                        .about("Delete unreferenced packages and pool files"),
                ),
        );

    let matches = app.get_matches();
    let ctx = Context::new(matches.get_one::<String>("root").map(|s| s.as_str()))?;

    match matches.subcommand() {
        Some(("mirror", sub)) => command_mirror(&ctx, sub).await,
        Some(("repo", sub)) => command_repo(&ctx, sub).await,
        Some(("snapshot", sub)) => command_snapshot(&ctx, sub),
        Some(("publish", sub)) => command_publish(&ctx, sub).await,
        Some(("db", sub)) => command_db(&ctx, sub),
        Some((command, _)) => Err(ToolError::InvalidSubCommand(command.to_string())),
        None => Err(ToolError::InvalidSubCommand(String::new())),
    }
}

fn publish_source_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(Arg::new("name").required(true))
        .arg(Arg::new("prefix").default_value("."))
        .arg(Arg::new("distribution").long("distribution").default_value(""))
        .arg(Arg::new("component").long("component").default_value(""))
        .arg(Arg::new("architectures").long("architectures"))
        .arg(Arg::new("origin").long("origin"))
        .arg(Arg::new("label").long("label"))
        .arg(
            Arg::new("skip-contents")
                .long("skip-contents")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("acquire-by-hash")
                .long("acquire-by-hash")
                .action(ArgAction::SetTrue),
        )
        .arg(Arg::new("multi-dist").long("multi-dist").action(ArgAction::SetTrue))
        .arg(Arg::new("gpg-key").long("gpg-key"))
        .arg(
            Arg::new("skip-signing")
                .long("skip-signing")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("force-overwrite")
                .long("force-overwrite")
                .action(ArgAction::SetTrue),
        )
}

async fn command_mirror(ctx: &Context, matches: &ArgMatches) -> Result<()> {
    let collection = ctx.factory.remote_repo_collection();

    match matches.subcommand() {
        Some(("create", args)) => {
            let components: Vec<String> = args
                .get_many::<String>("component")
                .map(|values| values.cloned().collect())
                .unwrap_or_else(|| vec!["main".to_string()]);
            let architectures = comma_list(args.get_one::<String>("architectures"));

            let repo = RemoteRepo::new(
                args.get_one::<String>("name").expect("required").clone(),
                args.get_one::<String>("url").expect("required").clone(),
                args.get_one::<String>("distribution").expect("required").clone(),
                components,
                architectures,
                args.get_flag("with-sources"),
                args.get_flag("with-udebs"),
                args.get_flag("with-installer"),
            );

            collection.add(&repo)?;
            println!("Mirror {} successfully added.", repo);
            Ok(())
        }
        Some(("update", args)) => {
            let name = args.get_one::<String>("name").expect("required");
            let max_tries: u32 = args
                .get_one::<String>("max-tries")
                .expect("defaulted")
                .parse()
                .unwrap_or(3);

            let mut repo = collection.by_name(name)?;
            collection.load_ref_list(&mut repo)?;

            let downloader = HttpDownloader::new();
            let temp = tempfile::tempdir()?;
            let cancel = CancellationToken::new();

            let mut list = repo.fetch_indexes(&downloader, temp.path()).await?;

            let package_collection = ctx.factory.package_collection();
            let checksum_storage = ctx.factory.checksum_storage();

            // Download missing package bodies and import them into the pool.
            let mut downloaded = 0usize;
            let packages: Vec<Package> = list.iter().cloned().collect();
            for pkg in packages {
                let mut pkg = pkg;
                let tasks = pkg.download_list(&ctx.pool, &checksum_storage)?;

                for task in tasks {
                    let url = repo.package_url(&task.download_url);
                    let staged = temp.path().join("download").join(&task.download_url);

                    download_with_retry(
                        &downloader,
                        &url,
                        &staged,
                        &task.expected,
                        max_tries,
                        &cancel,
                    )
                    .await?;

                    let mut files = pkg.files().clone();
                    let file = &mut files.0[task.file_index];
                    file.pool_path = ctx.pool.import(
                        &staged,
                        &file.filename,
                        &mut file.checksums,
                        true,
                        &checksum_storage,
                    )?;
                    pkg.update_files(files);
                    downloaded += 1;
                }

                package_collection.update(&pkg)?;
                list.remove(&pkg);
                list.add(pkg)?;
            }

            repo.finalize_update(&list);
            collection.update(&repo)?;

            println!(
                "Mirror {} updated: {} packages, {} files downloaded.",
                repo,
                list.len(),
                downloaded
            );
            Ok(())
        }
        Some(("list", _)) => {
            for repo in collection.list()? {
                println!("{}", repo);
            }
            Ok(())
        }
        Some(("drop", args)) => {
            let name = args.get_one::<String>("name").expect("required");
            let repo = collection.by_name(name)?;
            collection.drop_entity(&repo)?;
            println!("Mirror {} has been removed.", name);
            Ok(())
        }
        Some((command, _)) => Err(ToolError::InvalidSubCommand(command.to_string())),
        None => Err(ToolError::InvalidSubCommand("mirror".to_string())),
    }
}

async fn command_repo(ctx: &Context, matches: &ArgMatches) -> Result<()> {
    let collection = ctx.factory.local_repo_collection();

    match matches.subcommand() {
        Some(("create", args)) => {
            let mut repo = LocalRepo::new(
                args.get_one::<String>("name").expect("required").clone(),
                args.get_one::<String>("comment").expect("defaulted").clone(),
            );
            repo.default_distribution = args
                .get_one::<String>("distribution")
                .expect("defaulted")
                .clone();
            repo.default_component = args
                .get_one::<String>("component")
                .expect("defaulted")
                .clone();

            collection.add(&repo)?;
            println!("Local repo {} successfully added.", repo);
            Ok(())
        }
        Some(("add", args)) => {
            let name = args.get_one::<String>("name").expect("required");
            let index = args.get_one::<String>("index").expect("required");
            let package_root =
                std::path::PathBuf::from(args.get_one::<String>("package-root").expect("defaulted"));

            let mut repo = collection.by_name(name)?;
            collection.load_ref_list(&mut repo)?;

            let package_collection = ctx.factory.package_collection();
            let checksum_storage = ctx.factory.checksum_storage();

            let file = std::fs::File::open(index)?;
            let mut list = PackageList::from_ref_list(
                &repo.ref_list(),
                &package_collection,
            )?;

            for stanza in StanzaReader::new(BufReader::new(file)) {
                let mut pkg = Package::from_control_stanza(stanza?);

                let mut files = pkg.files().clone();
                for f in &mut files.0 {
                    let staged = package_root.join(f.download_url());
                    f.pool_path = ctx.pool.import(
                        &staged,
                        &f.filename,
                        &mut f.checksums,
                        false,
                        &checksum_storage,
                    )?;
                }
                pkg.update_files(files);

                package_collection.update(&pkg)?;
                list.add(pkg)?;
            }

            repo.update_ref_list(&list);
            collection.update(&repo)?;
            println!("Added packages to {}; now {} packages.", name, repo.num_packages());
            Ok(())
        }
        Some(("list", _)) => {
            for repo in collection.list()? {
                println!("{}", repo);
            }
            Ok(())
        }
        Some((command, _)) => Err(ToolError::InvalidSubCommand(command.to_string())),
        None => Err(ToolError::InvalidSubCommand("repo".to_string())),
    }
}

fn command_snapshot(ctx: &Context, matches: &ArgMatches) -> Result<()> {
    let collection = ctx.factory.snapshot_collection();

    match matches.subcommand() {
        Some(("create", args)) => {
            let name = args.get_one::<String>("name").expect("required");

            let snapshot = if let Some(mirror) = args.get_one::<String>("from-mirror") {
                let mirror_collection = ctx.factory.remote_repo_collection();
                let mut repo = mirror_collection.by_name(mirror)?;
                mirror_collection.load_ref_list(&mut repo)?;
                Snapshot::from_repo(name.clone(), &repo)
            } else if let Some(local) = args.get_one::<String>("from-repo") {
                let local_collection = ctx.factory.local_repo_collection();
                let mut repo = local_collection.by_name(local)?;
                local_collection.load_ref_list(&mut repo)?;
                Snapshot::from_local_repo(name.clone(), &repo)
            } else {
                return Err(ToolError::InvalidSubCommand(
                    "snapshot create needs --from-mirror or --from-repo".to_string(),
                ));
            };

            collection.add(&snapshot)?;
            println!("Snapshot {} successfully created.", snapshot.name);
            Ok(())
        }
        Some(("merge", args)) => {
            let name = args.get_one::<String>("name").expect("required");
            let source_names: Vec<&String> =
                args.get_many::<String>("source").expect("required").collect();

            let mut sources = Vec::with_capacity(source_names.len());
            for source_name in &source_names {
                let mut snapshot = collection.by_name(source_name)?;
                collection.load_ref_list(&mut snapshot)?;
                sources.push(snapshot);
            }

            let source_refs: Vec<&Snapshot> = sources.iter().collect();
            let merged = Snapshot::merge(
                name.clone(),
                &source_refs,
                !args.get_flag("no-latest"),
                false,
            );

            collection.add(&merged)?;
            println!(
                "Snapshot {} merged from {} sources ({} packages).",
                merged.name,
                sources.len(),
                merged.num_packages()
            );
            Ok(())
        }
        Some(("pull", args)) => {
            let package_collection = ctx.factory.package_collection();

            let mut to = collection.by_name(args.get_one::<String>("to").expect("required"))?;
            collection.load_ref_list(&mut to)?;
            let mut source =
                collection.by_name(args.get_one::<String>("source").expect("required"))?;
            collection.load_ref_list(&mut source)?;

            let mut target_list =
                PackageList::from_ref_list(&to.ref_list(), &package_collection)?;
            target_list.prepare_index();
            let mut source_list =
                PackageList::from_ref_list(&source.ref_list(), &package_collection)?;
            source_list.prepare_index();

            let queries = args
                .get_many::<String>("package")
                .expect("required")
                .map(|p| {
                    Ok(debian_archive::query::PackageQuery::Dependency(
                        debian_archive::dependency::parse_dependency(p)?,
                    ))
                })
                .collect::<std::result::Result<Vec<_>, ArchiveError>>()?;

            let architectures = comma_list(args.get_one::<String>("architectures"));

            let options = debian_archive::snapshot::PullOptions {
                with_dependencies: !args.get_flag("no-deps"),
                dependency_options: 0,
                all_matches: args.get_flag("all-matches"),
            };

            let (added, refs) = debian_archive::snapshot::pull(
                &source_list,
                &target_list,
                queries,
                &architectures,
                &options,
            )?;

            let destination = args.get_one::<String>("destination").expect("required");
            let snapshot = Snapshot::from_ref_list(
                destination.clone(),
                &[&to, &source],
                refs,
                format!("Pulled into '{}' from '{}'", to.name, source.name),
            );
            collection.add(&snapshot)?;

            println!(
                "Snapshot {} created: {} packages pulled.",
                destination,
                added.len()
            );
            Ok(())
        }
        Some(("list", _)) => {
            for snapshot in collection.list()? {
                println!("{}", snapshot);
            }
            Ok(())
        }
        Some(("drop", args)) => {
            let name = args.get_one::<String>("name").expect("required");
            let snapshot = collection.by_name(name)?;
            collection.drop_entity(&snapshot)?;
            println!("Snapshot {} has been removed.", name);
            Ok(())
        }
        Some((command, _)) => Err(ToolError::InvalidSubCommand(command.to_string())),
        None => Err(ToolError::InvalidSubCommand("snapshot".to_string())),
    }
}

async fn command_publish(ctx: &Context, matches: &ArgMatches) -> Result<()> {
    let collection = ctx.factory.published_repo_collection();

    match matches.subcommand() {
        Some((kind @ ("snapshot" | "repo"), args)) => {
            let name = args.get_one::<String>("name").expect("required");
            let prefix = args.get_one::<String>("prefix").expect("defaulted");

            let source = if kind == "snapshot" {
                let snapshot_collection = ctx.factory.snapshot_collection();
                let mut snapshot = snapshot_collection.by_name(name)?;
                snapshot_collection.load_ref_list(&mut snapshot)?;
                PublishSource::Snapshot(snapshot)
            } else {
                let local_collection = ctx.factory.local_repo_collection();
                let mut repo = local_collection.by_name(name)?;
                local_collection.load_ref_list(&mut repo)?;
                PublishSource::LocalRepo(repo)
            };

            let architectures = {
                let list = comma_list(args.get_one::<String>("architectures"));
                if list.is_empty() {
                    None
                } else {
                    Some(list)
                }
            };

            let mut repo = PublishedRepo::new(
                "",
                prefix,
                args.get_one::<String>("distribution").expect("defaulted"),
                architectures,
                vec![args.get_one::<String>("component").expect("defaulted").clone()],
                vec![source],
                &ctx.factory,
                args.get_flag("multi-dist"),
            )?;

            if let Some(origin) = args.get_one::<String>("origin") {
                repo.origin = origin.clone();
            }
            if let Some(label) = args.get_one::<String>("label") {
                repo.label = label.clone();
            }
            repo.skip_contents = args.get_flag("skip-contents");
            repo.acquire_by_hash = args.get_flag("acquire-by-hash");

            let signer: Option<Box<dyn Signer>> = if args.get_flag("skip-signing") {
                None
            } else {
                let mut gpg = GpgSigner::new();
                if let Some(key) = args.get_one::<String>("gpg-key") {
                    gpg.set_key(key);
                }
                Some(Box::new(gpg))
            };

            repo.publish(
                &ctx.pool,
                &ctx.provider,
                &ctx.factory,
                signer.as_deref(),
                None,
                args.get_flag("force-overwrite"),
            )
            .await?;

            collection.add(&repo)?;
            println!("Published {}.", repo);
            Ok(())
        }
        Some(("switch", args)) => {
            let distribution = args.get_one::<String>("distribution").expect("required");
            let prefix = args.get_one::<String>("prefix").expect("defaulted");
            let snapshot_name = args.get_one::<String>("snapshot").expect("required");
            let component = args.get_one::<String>("component").expect("defaulted");

            let mut repo = collection.by_storage_prefix_distribution(prefix, distribution)?;

            let revision = repo.obtain_revision();
            revision
                .sources
                .insert(component.clone(), snapshot_name.clone());
            repo.update(&ctx.factory)?;

            let signer: Option<Box<dyn Signer>> = if args.get_flag("skip-signing") {
                None
            } else {
                let mut gpg = GpgSigner::new();
                if let Some(key) = args.get_one::<String>("gpg-key") {
                    gpg.set_key(key);
                }
                Some(Box::new(gpg))
            };

            repo.publish(
                &ctx.pool,
                &ctx.provider,
                &ctx.factory,
                signer.as_deref(),
                None,
                args.get_flag("force-overwrite"),
            )
            .await?;
            collection.update(&repo)?;

            let removed = collection
                .cleanup_prefix_pool_files("", prefix, &ctx.provider, &ctx.factory)
                .await?;
            println!(
                "Published repository switched to {}; {} stale pool files removed.",
                snapshot_name,
                removed.len()
            );
            Ok(())
        }
        Some(("list", _)) => {
            for repo in collection.list()? {
                println!("{}", repo);
            }
            Ok(())
        }
        Some(("drop", args)) => {
            let distribution = args.get_one::<String>("distribution").expect("required");
            let prefix = args.get_one::<String>("prefix").expect("defaulted");

            let repo = collection.by_storage_prefix_distribution(prefix, distribution)?;
            repo.remove_files(&ctx.provider).await?;

            collection.drop_entity(&repo)?;

            let removed = collection
                .cleanup_prefix_pool_files("", prefix, &ctx.provider, &ctx.factory)
                .await?;
            println!(
                "Published repository {}/{} dropped; {} pool files removed.",
                prefix,
                distribution,
                removed.len()
            );
            Ok(())
        }
        Some((command, _)) => Err(ToolError::InvalidSubCommand(command.to_string())),
        None => Err(ToolError::InvalidSubCommand("publish".to_string())),
    }
}

fn command_db(ctx: &Context, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("cleanup", _)) => {
            let (packages, files) = database_cleanup(&ctx.factory, &ctx.pool)?;
            println!(
                "Cleanup complete: {} packages and {} pool files removed.",
                packages, files
            );
            Ok(())
        }
        Some((command, _)) => Err(ToolError::InvalidSubCommand(command.to_string())),
        None => Err(ToolError::InvalidSubCommand("db".to_string())),
    }
}
