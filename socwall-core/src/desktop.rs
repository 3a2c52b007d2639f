use std::fmt;
use std::process::Command;
use std::str::FromStr;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DesktopEnv {
    Gnome,
    Gnome2,
    Gnome3,
    Unity,
    Cinnamon,
    AwesomeGnome,
    Mate,
    Xfce4,
    Kde,
    /// KDE 3 and its Trinity fork.
    Kde3,
    /// fluxbox, jwm, afterstep and openbox all ship `fbsetbg`.
    Fluxbox,
    Blackbox,
    IceWm,
    Lxde,
    WindowMaker,
    Windows,
    Mac,
    I3,
    Unknown,
}

impl DesktopEnv {
    pub const ALL: [DesktopEnv; 19] = [
        DesktopEnv::Gnome,
        DesktopEnv::Gnome2,
        DesktopEnv::Gnome3,
        DesktopEnv::Unity,
        DesktopEnv::Cinnamon,
        DesktopEnv::AwesomeGnome,
        DesktopEnv::Mate,
        DesktopEnv::Xfce4,
        DesktopEnv::Kde,
        DesktopEnv::Kde3,
        DesktopEnv::Fluxbox,
        DesktopEnv::Blackbox,
        DesktopEnv::IceWm,
        DesktopEnv::Lxde,
        DesktopEnv::WindowMaker,
        DesktopEnv::Windows,
        DesktopEnv::Mac,
        DesktopEnv::I3,
        DesktopEnv::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DesktopEnv::Gnome => "gnome",
            DesktopEnv::Gnome2 => "gnome2",
            DesktopEnv::Gnome3 => "gnome3",
            DesktopEnv::Unity => "unity",
            DesktopEnv::Cinnamon => "cinnamon",
            DesktopEnv::AwesomeGnome => "awesome-gnome",
            DesktopEnv::Mate => "mate",
            DesktopEnv::Xfce4 => "xfce4",
            DesktopEnv::Kde => "kde",
            DesktopEnv::Kde3 => "kde3",
            DesktopEnv::Fluxbox => "fluxbox",
            DesktopEnv::Blackbox => "blackbox",
            DesktopEnv::IceWm => "icewm",
            DesktopEnv::Lxde => "lxde",
            DesktopEnv::WindowMaker => "windowmaker",
            DesktopEnv::Windows => "windows",
            DesktopEnv::Mac => "mac",
            DesktopEnv::I3 => "i3",
            DesktopEnv::Unknown => "unknown",
        }
    }

    /// Maps a `DESKTOP_SESSION` value to a desktop family.
    pub fn from_session(session: &str) -> DesktopEnv {
        let session = session.trim().to_lowercase();

        if session.starts_with("i3") {
            return DesktopEnv::I3;
        }
        if let Ok(desktop) = session.parse::<DesktopEnv>() {
            return desktop;
        }

        if session.contains("xfce") || session.starts_with("xubuntu") {
            DesktopEnv::Xfce4
        } else if session.starts_with("ubuntustudio") || session.starts_with("kubuntu") || session.starts_with("plasma") {
            DesktopEnv::Kde
        } else if session.starts_with("ubuntu") {
            DesktopEnv::Unity
        } else if session.starts_with("gnome3") {
            DesktopEnv::Gnome3
        } else if session.starts_with("gnome") {
            DesktopEnv::Gnome
        } else if session.starts_with("lubuntu") {
            DesktopEnv::Lxde
        } else if session.starts_with("wmaker") {
            DesktopEnv::WindowMaker
        } else {
            DesktopEnv::Unknown
        }
    }
}

impl fmt::Display for DesktopEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DesktopEnv {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_lowercase();
        let desktop = match value.as_str() {
            "trinity" => DesktopEnv::Kde3,
            "jwm" | "afterstep" | "openbox" => DesktopEnv::Fluxbox,
            other => DesktopEnv::ALL
                .into_iter()
                .find(|desktop| desktop.as_str() == other)
                .ok_or_else(|| format!("unknown desktop environment {:?}", value))?,
        };
        Ok(desktop)
    }
}

/// Desktop environment of the running session.
pub fn detect() -> DesktopEnv {
    if cfg!(any(target_os = "windows", target_os = "cygwin")) {
        return DesktopEnv::Windows;
    }
    if cfg!(target_os = "macos") {
        return DesktopEnv::Mac;
    }
    detect_with(|key| std::env::var(key).ok(), is_running)
}

/// Unix detection over an environment lookup and a process probe.
pub fn detect_with<E, P>(env: E, is_running: P) -> DesktopEnv
where
    E: Fn(&str) -> Option<String>,
    P: Fn(&str) -> bool,
{
    if let Some(session) = env("DESKTOP_SESSION").filter(|s| !s.trim().is_empty()) {
        let desktop = DesktopEnv::from_session(&session);
        if desktop != DesktopEnv::Unknown {
            return desktop;
        }
        log::debug!("Unrecognised DESKTOP_SESSION {:?}", session);
    }

    if env("KDE_FULL_SESSION").as_deref() == Some("true") {
        return DesktopEnv::Kde;
    }

    if let Some(session_id) = env("GNOME_DESKTOP_SESSION_ID").filter(|s| !s.is_empty()) {
        return if session_id.contains("deprecated") {
            DesktopEnv::Gnome3
        } else {
            DesktopEnv::Gnome2
        };
    }

    if is_running("xfce-mcs-manage") {
        return DesktopEnv::Xfce4;
    }
    if is_running("ksmserver") {
        return DesktopEnv::Kde;
    }

    DesktopEnv::Unknown
}

/// True if a process whose command line contains `process` as a whole word is running.
pub fn is_running(process: &str) -> bool {
    let Ok(pattern) = Regex::new(&format!(r"\b{}\b", regex::escape(process))) else {
        return false;
    };

    let output = if cfg!(target_os = "windows") {
        Command::new("tasklist").arg("/v").output()
    } else {
        Command::new("ps").arg("axw").output()
    };

    match output {
        Ok(output) => String::from_utf8_lossy(&output.stdout)
            .lines()
            .any(|line| pattern.is_match(line)),
        Err(e) => {
            log::debug!("Could not list processes: {}", e);
            false
        }
    }
}
