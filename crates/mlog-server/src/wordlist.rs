/// Words combined into generated mission names.
pub const WORDS: &[&str] = &[
    "aurora", "beacon", "comet", "corona", "dawn", "eclipse", "ember", "equinox", "falcon",
    "frontier", "gemini", "halo", "horizon", "icarus", "juno", "kestrel", "lumen", "meridian",
    "meteor", "nebula", "nova", "odyssey", "orbit", "orion", "pegasus", "perihelion", "phoenix",
    "pioneer", "polaris", "pulsar", "quasar", "radiant", "ranger", "solstice", "spectrum",
    "stardust", "summit", "tempest", "titan", "vanguard", "vega", "voyager", "zenith", "zephyr",
];

pub const DESTINATIONS: &[&str] = &[
    "Earth Orbit",
    "Moon",
    "Mars",
    "Jupiter",
    "Saturn",
    "Venus",
    "Mercury",
];

pub const CREW_NAMES: &[&str] = &["Alice", "Bob", "Charlie", "David", "Eve"];
