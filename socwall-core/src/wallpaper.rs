use std::fmt;
use std::path::Path;
use std::process::Command;

use crate::desktop::DesktopEnv;
use crate::error::{Error, Result};

const GNOME_BACKGROUND: &str = "org.gnome.desktop.background";

/// Applies an image as the desktop background.
pub trait WallpaperSetter {
    fn name(&self) -> &str;
    fn apply(&self, image: &Path) -> Result<()>;
}

/// One external command line. Optional invocations may fail without failing
/// the attempt they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    optional: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            optional: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    fn run(&self) -> std::result::Result<(), String> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| format!("{}: {}", self.program, e))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            if stderr.is_empty() {
                Err(format!("`{}` exited with {}", self, output.status))
            } else {
                Err(format!("`{}` exited with {}: {}", self, output.status, stderr))
            }
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Ordered fallback attempts. Each attempt is a sequence of invocations that
/// must all succeed; the first successful attempt wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandChain {
    attempts: Vec<Vec<Invocation>>,
}

impl CommandChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt(mut self, steps: Vec<Invocation>) -> Self {
        self.attempts.push(steps);
        self
    }

    pub fn then(mut self, fallback: CommandChain) -> Self {
        self.attempts.extend(fallback.attempts);
        self
    }

    pub fn attempts(&self) -> &[Vec<Invocation>] {
        &self.attempts
    }

    pub fn run(&self, desktop: &str) -> Result<()> {
        let mut failures = Vec::new();

        for steps in &self.attempts {
            match run_steps(steps) {
                Ok(()) => return Ok(()),
                Err(failure) => {
                    log::debug!("Wallpaper attempt for {} failed: {}", desktop, failure);
                    failures.push(failure);
                }
            }
        }

        if failures.is_empty() {
            failures.push("no commands to run".to_string());
        }
        Err(Error::Apply {
            desktop: desktop.to_string(),
            failures,
        })
    }
}

fn run_steps(steps: &[Invocation]) -> std::result::Result<(), String> {
    for step in steps {
        match step.run() {
            Ok(()) => {}
            Err(failure) if step.optional => log::debug!("Ignoring optional step: {}", failure),
            Err(failure) => return Err(failure),
        }
    }
    Ok(())
}

/// A desktop family driven entirely by external tools.
pub struct CommandSetter {
    name: &'static str,
    plan: fn(&str) -> CommandChain,
}

impl CommandSetter {
    pub fn new(name: &'static str, plan: fn(&str) -> CommandChain) -> Self {
        Self { name, plan }
    }

    pub fn chain_for(&self, image: &Path) -> CommandChain {
        (self.plan)(&image.to_string_lossy())
    }
}

impl WallpaperSetter for CommandSetter {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, image: &Path) -> Result<()> {
        self.chain_for(image).run(self.name)
    }
}

/// Xfce keeps one `last-image` property per monitor and workspace, so the
/// property list is read before the chain is built.
pub struct XfceSetter;

impl WallpaperSetter for XfceSetter {
    fn name(&self) -> &str {
        "xfce4"
    }

    fn apply(&self, image: &Path) -> Result<()> {
        let properties = Command::new("xfconf-query")
            .args(["-c", "xfce4-desktop", "-l"])
            .output()
            .ok()
            .filter(|output| output.status.success())
            .map(|output| String::from_utf8_lossy(&output.stdout).into_owned())
            .unwrap_or_default();

        xfce_chain(&image.to_string_lossy(), &properties).run(self.name())
    }
}

/// Platform API through the `wallpaper` crate.
pub struct NativeSetter;

impl WallpaperSetter for NativeSetter {
    fn name(&self) -> &str {
        "native"
    }

    fn apply(&self, image: &Path) -> Result<()> {
        wallpaper::set_from_path(&image.to_string_lossy()).map_err(|e| Error::Apply {
            desktop: self.name().to_string(),
            failures: vec![e.to_string()],
        })
    }
}

pub fn setter_for(desktop: DesktopEnv) -> Box<dyn WallpaperSetter> {
    match desktop {
        DesktopEnv::Gnome
        | DesktopEnv::Gnome3
        | DesktopEnv::Unity
        | DesktopEnv::Cinnamon
        | DesktopEnv::AwesomeGnome => Box::new(CommandSetter::new("gnome", gnome_chain)),
        DesktopEnv::Gnome2 => Box::new(CommandSetter::new("gnome2", gnome2_chain)),
        DesktopEnv::Mate => Box::new(CommandSetter::new("mate", mate_chain)),
        DesktopEnv::Xfce4 => Box::new(XfceSetter),
        DesktopEnv::Kde => Box::new(CommandSetter::new("kde", kde_chain)),
        DesktopEnv::Kde3 => Box::new(CommandSetter::new("kde3", kde3_chain)),
        DesktopEnv::Fluxbox => Box::new(CommandSetter::new("fluxbox", fluxbox_chain)),
        DesktopEnv::Blackbox => Box::new(CommandSetter::new("blackbox", blackbox_chain)),
        DesktopEnv::IceWm => Box::new(CommandSetter::new("icewm", icewm_chain)),
        DesktopEnv::Lxde => Box::new(CommandSetter::new("lxde", lxde_chain)),
        DesktopEnv::WindowMaker => Box::new(CommandSetter::new("windowmaker", windowmaker_chain)),
        DesktopEnv::I3 => Box::new(CommandSetter::new("i3", i3_chain)),
        DesktopEnv::Windows | DesktopEnv::Mac | DesktopEnv::Unknown => Box::new(NativeSetter),
    }
}

/// Sets `image` as the background of `desktop`.
pub fn apply(desktop: DesktopEnv, image: &Path) -> Result<()> {
    let setter = setter_for(desktop);
    log::info!("Setting wallpaper {} via {} ({})", image.display(), setter.name(), desktop);

    setter.apply(image)?;
    log::info!("Wallpaper set to {}", image.display());
    Ok(())
}

fn gnome_chain(image: &str) -> CommandChain {
    let uri = format!("file://{}", image);
    CommandChain::new()
        .attempt(vec![
            Invocation::new("gsettings").args(["set", GNOME_BACKGROUND, "picture-uri", &uri]),
            Invocation::new("gsettings")
                .args(["set", GNOME_BACKGROUND, "picture-uri-dark", &uri])
                .optional(),
        ])
        .attempt(vec![Invocation::new("dconf")
            .args(["write", "/org/gnome/desktop/background/picture-uri"])
            .arg(format!("'{}'", uri))])
}

fn gnome2_chain(image: &str) -> CommandChain {
    CommandChain::new()
        .attempt(vec![Invocation::new("gconftool-2").args([
            "-t",
            "string",
            "--set",
            "/desktop/gnome/background/picture_filename",
            image,
        ])])
        .then(gnome_chain(image))
}

fn mate_chain(image: &str) -> CommandChain {
    CommandChain::new()
        .attempt(vec![Invocation::new("gsettings").args([
            "set",
            "org.mate.background",
            "picture-filename",
            image,
        ])])
        .attempt(vec![Invocation::new("mateconftool-2").args([
            "-t",
            "string",
            "--set",
            "/desktop/mate/background/picture_filename",
            image,
        ])])
}

fn xfce_chain(image: &str, properties: &str) -> CommandChain {
    let mut steps: Vec<Invocation> = properties
        .lines()
        .map(str::trim)
        .filter(|property| property.ends_with("workspace0/last-image"))
        .map(|property| {
            Invocation::new("xfconf-query")
                .args(["-c", "xfce4-desktop", "-p", property, "-s", image])
                .optional()
        })
        .collect();

    steps.extend([
        Invocation::new("xfconf-query").args([
            "-c",
            "xfce4-desktop",
            "-p",
            "/backdrop/screen0/monitor0/image-path",
            "-s",
            image,
        ]),
        Invocation::new("xfconf-query").args([
            "-c",
            "xfce4-desktop",
            "-p",
            "/backdrop/screen0/monitor0/image-style",
            "-s",
            "3",
        ]),
        Invocation::new("xfconf-query").args([
            "-c",
            "xfce4-desktop",
            "-p",
            "/backdrop/screen0/monitor0/image-show",
            "-s",
            "true",
        ]),
        Invocation::new("xfdesktop").arg("--reload"),
    ]);

    CommandChain::new().attempt(steps)
}

fn kde_chain(image: &str) -> CommandChain {
    let escaped = image.replace('\\', "\\\\").replace('"', "\\\"");
    let script = format!(
        "var allDesktops = desktops();\
         for (i = 0; i < allDesktops.length; i++) {{\
         d = allDesktops[i];\
         d.wallpaperPlugin = \"org.kde.image\";\
         d.currentConfigGroup = Array(\"Wallpaper\", \"org.kde.image\", \"General\");\
         d.writeConfig(\"Image\", \"file://{}\");\
         }}",
        escaped
    );

    let mut chain = CommandChain::new().attempt(vec![Invocation::new("plasma-apply-wallpaperimage").arg(image)]);
    for qdbus in ["qdbus6", "qdbus"] {
        chain = chain.attempt(vec![Invocation::new(qdbus).args([
            "org.kde.plasmashell",
            "/PlasmaShell",
            "org.kde.PlasmaShell.evaluateScript",
            &script,
        ])]);
    }
    chain
}

fn kde3_chain(image: &str) -> CommandChain {
    CommandChain::new().attempt(vec![Invocation::new("dcop").args([
        "kdesktop",
        "KBackgroundIface",
        "setWallpaper",
        "0",
        image,
        "6",
    ])])
}

fn fluxbox_chain(image: &str) -> CommandChain {
    CommandChain::new().attempt(vec![Invocation::new("fbsetbg").arg(image)])
}

fn blackbox_chain(image: &str) -> CommandChain {
    CommandChain::new().attempt(vec![Invocation::new("bsetbg").args(["-full", image])])
}

fn icewm_chain(image: &str) -> CommandChain {
    CommandChain::new().attempt(vec![Invocation::new("icewmbg").arg(image)])
}

fn lxde_chain(image: &str) -> CommandChain {
    CommandChain::new().attempt(vec![Invocation::new("pcmanfm").args([
        "--set-wallpaper",
        image,
        "--wallpaper-mode=scaled",
    ])])
}

fn windowmaker_chain(image: &str) -> CommandChain {
    CommandChain::new().attempt(vec![Invocation::new("wmsetbg").args(["-s", "-u", image])])
}

fn i3_chain(image: &str) -> CommandChain {
    CommandChain::new()
        .attempt(vec![Invocation::new("feh").args(["--bg-fill", image])])
        .then(gnome_chain(image))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn programs(chain: &CommandChain) -> Vec<Vec<&str>> {
        chain
            .attempts()
            .iter()
            .map(|steps| steps.iter().map(Invocation::program).collect())
            .collect()
    }

    #[test]
    fn test_setter_for_families() {
        let cases = [
            (DesktopEnv::Gnome, "gnome"),
            (DesktopEnv::Unity, "gnome"),
            (DesktopEnv::Cinnamon, "gnome"),
            (DesktopEnv::AwesomeGnome, "gnome"),
            (DesktopEnv::Gnome2, "gnome2"),
            (DesktopEnv::Mate, "mate"),
            (DesktopEnv::Xfce4, "xfce4"),
            (DesktopEnv::Kde, "kde"),
            (DesktopEnv::Kde3, "kde3"),
            (DesktopEnv::Fluxbox, "fluxbox"),
            (DesktopEnv::Lxde, "lxde"),
            (DesktopEnv::I3, "i3"),
            (DesktopEnv::Windows, "native"),
            (DesktopEnv::Mac, "native"),
            (DesktopEnv::Unknown, "native"),
        ];
        for (desktop, name) in cases {
            assert_eq!(setter_for(desktop).name(), name, "{desktop}");
        }
    }

    #[test]
    fn test_gnome_chain_uses_file_uri() {
        let chain = gnome_chain("/home/me/Wallpapers/socwall-1.jpg");
        assert_eq!(programs(&chain), vec![vec!["gsettings", "gsettings"], vec!["dconf"]]);

        let gsettings = &chain.attempts()[0][0];
        assert_eq!(
            gsettings.arguments().last().map(String::as_str),
            Some("file:///home/me/Wallpapers/socwall-1.jpg")
        );
        let dconf = &chain.attempts()[1][0];
        assert_eq!(
            dconf.arguments().last().map(String::as_str),
            Some("'file:///home/me/Wallpapers/socwall-1.jpg'")
        );
    }

    #[test]
    fn test_fallback_families_extend_gnome() {
        assert_eq!(
            programs(&gnome2_chain("/tmp/a.jpg")),
            vec![vec!["gconftool-2"], vec!["gsettings", "gsettings"], vec!["dconf"]]
        );
        assert_eq!(
            programs(&i3_chain("/tmp/a.jpg")),
            vec![vec!["feh"], vec!["gsettings", "gsettings"], vec!["dconf"]]
        );
        assert_eq!(
            programs(&kde_chain("/tmp/a.jpg")),
            vec![vec!["plasma-apply-wallpaperimage"], vec!["qdbus6"], vec!["qdbus"]]
        );
    }

    #[test]
    fn test_xfce_chain_sets_every_last_image_property() {
        let properties = "/backdrop/screen0/monitor0/image-path\n\
                          /backdrop/screen0/monitorHDMI-1/workspace0/last-image\n\
                          /backdrop/screen0/monitoreDP-1/workspace0/last-image\n";
        let chain = xfce_chain("/tmp/a.jpg", properties);

        assert_eq!(chain.attempts().len(), 1);
        let steps = &chain.attempts()[0];
        assert_eq!(steps.len(), 6);
        assert!(steps[..2].iter().all(|step| step.optional));
        assert_eq!(steps[0].arguments()[3], "/backdrop/screen0/monitorHDMI-1/workspace0/last-image");
        assert_eq!(steps[5].to_string(), "xfdesktop --reload");
    }

    #[test]
    fn test_kde_script_escapes_quotes() {
        let chain = kde_chain("/tmp/say \"hi\".jpg");
        let script = chain.attempts()[1][0].arguments().last().unwrap();
        assert!(script.contains(r#"file:///tmp/say \"hi\".jpg"#), "{script}");
    }

    #[test]
    fn test_empty_chain_fails() {
        let result = CommandChain::new().run("none");
        assert!(matches!(result, Err(Error::Apply { ref failures, .. }) if failures.len() == 1));
    }

    #[cfg(unix)]
    mod commands {
        use super::*;

        fn sh(script: &str) -> Invocation {
            Invocation::new("sh").args(["-c", script])
        }

        #[test]
        fn test_first_successful_attempt_wins() {
            let temp_dir = tempfile::TempDir::new().unwrap();
            let marker = temp_dir.path().join("ran");
            let chain = CommandChain::new()
                .attempt(vec![sh("exit 1")])
                .attempt(vec![sh("exit 0")])
                .attempt(vec![sh(&format!("touch {}", marker.display()))]);

            chain.run("test").unwrap();
            assert!(!marker.exists());
        }

        #[test]
        fn test_attempt_requires_every_step() {
            let chain = CommandChain::new().attempt(vec![sh("exit 0"), sh("echo broken >&2; exit 3")]);

            match chain.run("test") {
                Err(Error::Apply { desktop, failures }) => {
                    assert_eq!(desktop, "test");
                    assert_eq!(failures.len(), 1);
                    assert!(failures[0].contains("broken"), "{failures:?}");
                }
                other => panic!("expected apply error, got {other:?}"),
            }
        }

        #[test]
        fn test_optional_step_failure_is_ignored() {
            let chain = CommandChain::new().attempt(vec![sh("exit 0"), sh("exit 1").optional()]);
            chain.run("test").unwrap();
        }

        #[test]
        fn test_all_failures_are_reported() {
            let chain = CommandChain::new()
                .attempt(vec![Invocation::new("socwall-no-such-program-here")])
                .attempt(vec![sh("exit 2")]);

            match chain.run("test") {
                Err(Error::Apply { failures, .. }) => {
                    assert_eq!(failures.len(), 2);
                    assert!(failures[0].starts_with("socwall-no-such-program-here"), "{failures:?}");
                }
                other => panic!("expected apply error, got {other:?}"),
            }
        }
    }
}
