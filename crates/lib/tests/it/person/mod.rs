mod orphans;
