use std::sync::Arc;

use log::{debug, info};

use super::{AppFactoryHook, HookContext, import_bundle_modules};
use crate::{app::App, bundle::Bundle, cli::CommandEntry};

/// Assembles the app's command table from bundles' `commands` modules.
///
/// Bundles are visited in boot order so a later bundle overrides earlier
/// commands of the same name. A group is only registered when the bundle
/// lists it in its command group names.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegisterCommandsHook;

impl AppFactoryHook for RegisterCommandsHook {
    fn name(&self) -> &str {
        "register_commands"
    }

    fn bundle_module_names(&self) -> Vec<String> {
        vec!["commands".to_owned()]
    }

    fn run_after(&self) -> Vec<String> {
        vec!["configure_app".to_owned()]
    }

    fn run_hook(
        &mut self,
        app: &mut App,
        bundles: &[Arc<Bundle>],
        ctx: &HookContext<'_>,
    ) -> anyhow::Result<()> {
        for bundle in bundles {
            let group_names = bundle.command_group_names();
            for module in import_bundle_modules(self, bundle, ctx.loader)? {
                for entry in module.commands() {
                    if let CommandEntry::Group(group) = entry
                        && !group_names.iter().any(|name| name == group.name())
                    {
                        debug!(
                            "Skipping command group {} from {}: not in the command group names \
                             of bundle {}",
                            group.name(),
                            module.name(),
                            bundle.name()
                        );
                        continue;
                    }
                    app.cli_mut().add(entry.clone());
                }
            }
        }
        info!(
            "Registered {} top-level command(s)",
            app.cli().entries().count()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        cli::{Command, CommandGroup},
        config::ProjectConfig,
        env::Env,
        module::{Module, ModuleCatalog},
    };

    #[test]
    fn test_groups_need_to_be_listed() {
        let catalog = ModuleCatalog::new().with(
            Module::new("db.commands")
                .with_command(CommandGroup::new("db").command(Command::new("migrate", |_, _| Ok(()))))
                .with_command(CommandGroup::new("secret").command(Command::new("x", |_, _| Ok(()))))
                .with_command(Command::new("dbshell", |_, _| Ok(()))),
        );
        let bundles = [Arc::new(Bundle::new("db"))];
        let project = ProjectConfig::new(["db"]);
        let mut app = App::new("test", Env::Test);
        let ctx = HookContext {
            loader: &catalog,
            project: &project,
            env: Env::Test,
        };
        RegisterCommandsHook.run_hook(&mut app, &bundles, &ctx).unwrap();

        let names: Vec<_> = app.cli().entries().map(CommandEntry::name).collect();
        assert_eq!(names, ["db", "dbshell"]);
    }

    #[test]
    fn test_later_bundle_wins() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let command = |owner: &'static str| {
            let calls = Arc::clone(&calls);
            Command::new("baz", move |_, _| {
                calls.lock().unwrap().push(owner);
                Ok(())
            })
        };
        let catalog = ModuleCatalog::new()
            .with(Module::new("vendor.commands").with_command(CommandGroup::new("foo").command(command("vendor"))))
            .with(Module::new("app.commands").with_command(CommandGroup::new("foo").command(command("app"))));
        let bundles = [
            Arc::new(Bundle::new("vendor").with_command_group_names(["foo"])),
            Arc::new(Bundle::app("app").with_command_group_names(["foo"])),
        ];
        let project = ProjectConfig::new(["vendor", "app"]);
        let mut app = App::new("test", Env::Test);
        let ctx = HookContext {
            loader: &catalog,
            project: &project,
            env: Env::Test,
        };
        RegisterCommandsHook.run_hook(&mut app, &bundles, &ctx).unwrap();

        app.run_command(&["foo".to_owned(), "baz".to_owned()]).unwrap();
        assert_eq!(*calls.lock().unwrap(), ["app"]);
    }
}
