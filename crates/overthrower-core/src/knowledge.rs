//! Built-in knowledge base of allocation call sites needing special
//! treatment.
//!
//! Some allocations must never be failed (a `throw` has to be able to
//! materialize its exception object), some must never be tracked (the
//! dynamic loader's mapping records are never released), some both. A site
//! is
//! recognized by substring match against the symbolized stack frame within
//! a small depth window, counted from the interposed entry point; a window
//! rather than one exact depth keeps the rules stable when a frame shifts
//! by one between toolchains.

/// Verdict for one allocation site.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SiteClass {
    /// Never fail this allocation.
    pub white_listed: bool,
    /// Never track this allocation; it is expected to outlive the run.
    pub ignored: bool,
}

impl SiteClass {
    pub const CLEAR: Self = Self {
        white_listed: false,
        ignored: false,
    };

    /// Fail-safe verdict when the stack cannot be symbolized: failing or
    /// tracking an unidentified site is worse than skipping one.
    pub const BACKTRACE_FAILED: Self = Self {
        white_listed: true,
        ignored: true,
    };

    #[must_use]
    pub const fn any(self) -> bool {
        self.white_listed || self.ignored
    }
}

struct KnownSite {
    needle: &'static str,
    /// Inclusive frame-depth window; `None` matches at any depth.
    depths: Option<(u32, u32)>,
    class: SiteClass,
}

const WHITE_LISTED: SiteClass = SiteClass {
    white_listed: true,
    ignored: false,
};
const IGNORED: SiteClass = SiteClass {
    white_listed: false,
    ignored: true,
};
const EXEMPT: SiteClass = SiteClass {
    white_listed: true,
    ignored: true,
};

#[cfg(not(target_os = "macos"))]
const KNOWN_SITES: &[KnownSite] = &[
    KnownSite {
        needle: "__cxa_allocate_exception",
        depths: Some((2, 3)),
        class: WHITE_LISTED,
    },
    // atexit handler bookkeeping is allocated once and released by nobody.
    KnownSite {
        needle: "__cxa_atexit",
        depths: Some((2, 4)),
        class: EXEMPT,
    },
    // The loader's object-mapping records leak, especially under OOM; the
    // needle also covers _dl_map_object_deps.
    // https://sourceware.org/bugzilla/show_bug.cgi?id=2451
    KnownSite {
        needle: "_dl_map_object",
        depths: None,
        class: IGNORED,
    },
    KnownSite {
        needle: "_dl_catch_exception",
        depths: Some((5, 5)),
        class: IGNORED,
    },
    KnownSite {
        needle: "_dl_signal_error",
        depths: Some((2, 2)),
        class: EXEMPT,
    },
    KnownSite {
        needle: "_dl_exception_create",
        depths: Some((2, 2)),
        class: EXEMPT,
    },
    KnownSite {
        needle: "dlerror",
        depths: Some((4, 5)),
        class: IGNORED,
    },
    // Frames inside the loader itself often carry no symbol at all; the
    // frame text is then just the library path.
    KnownSite {
        needle: "ld-linux",
        depths: None,
        class: EXEMPT,
    },
    // https://patches-gcc.linaro.org/patch/6525/
    KnownSite {
        needle: "__libpthread_freeres",
        depths: None,
        class: IGNORED,
    },
];

#[cfg(target_os = "macos")]
const KNOWN_SITES: &[KnownSite] = &[
    KnownSite {
        needle: "__cxa_allocate_exception",
        depths: Some((3, 4)),
        class: WHITE_LISTED,
    },
    KnownSite {
        needle: "__cxa_atexit",
        depths: Some((3, 4)),
        class: EXEMPT,
    },
];

/// Classify one symbolized frame; the first matching rule wins.
#[must_use]
pub fn classify_frame(depth: u32, symbol: &str) -> SiteClass {
    for site in KNOWN_SITES {
        if let Some((first, last)) = site.depths {
            if !(first..=last).contains(&depth) {
                continue;
            }
        }
        if symbol.contains(site.needle) {
            return site.class;
        }
    }
    SiteClass::CLEAR
}

#[cfg(all(test, not(target_os = "macos")))]
mod tests {
    use super::{SiteClass, classify_frame};

    const EXCEPTION_FRAME: &str =
        "/lib/x86_64-linux-gnu/libstdc++.so.6(__cxa_allocate_exception+0x44) [0x7f1c2a8b1234]";

    #[test]
    fn exception_objects_are_white_listed_in_the_window() {
        for depth in 2..=3 {
            let class = classify_frame(depth, EXCEPTION_FRAME);
            assert!(class.white_listed);
            assert!(!class.ignored);
        }
    }

    #[test]
    fn exception_objects_outside_the_window_are_plain() {
        assert_eq!(classify_frame(1, EXCEPTION_FRAME), SiteClass::CLEAR);
        assert_eq!(classify_frame(6, EXCEPTION_FRAME), SiteClass::CLEAR);
    }

    #[test]
    fn atexit_registrations_are_exempt_and_untracked() {
        let class = classify_frame(3, "/lib/x86_64-linux-gnu/libc.so.6(__cxa_atexit+0x11)");
        assert!(class.white_listed);
        assert!(class.ignored);
    }

    #[test]
    fn loader_mapping_leaks_are_ignored_at_any_depth() {
        for depth in [1, 3, 6] {
            let class = classify_frame(depth, "/lib64/ld-linux-x86-64.so.2(_dl_map_object+0x9c)");
            assert!(class.ignored);
        }
        // _dl_map_object_deps matches through the same needle.
        assert!(classify_frame(2, "libc.so.6(_dl_map_object_deps+0x20)").ignored);
    }

    #[test]
    fn bare_loader_frames_are_fully_exempt() {
        let class = classify_frame(4, "/lib64/ld-linux-x86-64.so.2(+0x12e50) [0x7f0e8c61be50]");
        assert!(class.white_listed);
        assert!(class.ignored);
    }

    #[test]
    fn dlerror_window_is_respected() {
        assert!(classify_frame(4, "libc.so.6(dlerror+0x30)").ignored);
        assert_eq!(classify_frame(2, "libc.so.6(dlerror+0x30)"), SiteClass::CLEAR);
    }

    #[test]
    fn ordinary_frames_are_clear() {
        assert_eq!(
            classify_frame(2, "./app(main+0x120) [0x55d1e9b0a120]"),
            SiteClass::CLEAR
        );
    }

    #[test]
    fn the_fail_safe_verdict_is_maximal() {
        assert!(SiteClass::BACKTRACE_FAILED.white_listed);
        assert!(SiteClass::BACKTRACE_FAILED.ignored);
        assert!(SiteClass::BACKTRACE_FAILED.any());
        assert!(!SiteClass::CLEAR.any());
    }
}
